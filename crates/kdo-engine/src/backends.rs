//! Built-in jewel backends and the cluster-backed jewel store

use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kdo_core::jewel::secret_data;
use kdo_core::{
    Cluster, CoreError, JewelBackend, JewelKey, JewelSpec, JewelStore, JewelValue, Options, Result,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reads persisted jewel values from Secrets in the chart namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterJewelStore;

#[async_trait]
impl JewelStore for ClusterJewelStore {
    async fn load(&self, cluster: &dyn Cluster, secret_name: &str) -> Result<Option<JewelValue>> {
        let options = Options::new().ignoring_not_found();
        match cluster.get("Secret", secret_name, &options).await? {
            Some(secret) => Ok(Some(secret_data(&secret)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// PROMPT
// =============================================================================

/// Source of answers for prompt jewels
pub trait LineReader: Send {
    /// Show `prompt` and read one answer. `secret` answers are not echoed.
    fn read_line(&mut self, prompt: &str, secret: bool) -> std::io::Result<String>;
}

/// Reads answers from the controlling terminal
#[derive(Debug, Default)]
pub struct TerminalReader;

impl LineReader for TerminalReader {
    fn read_line(&mut self, prompt: &str, secret: bool) -> std::io::Result<String> {
        let term = console::Term::stderr();
        term.write_str(prompt)?;
        if secret {
            term.read_secure_line()
        } else {
            term.read_line()
        }
    }
}

/// Reads answers line by line from any buffered reader
pub struct ScriptedReader<R>(pub R);

impl<R: BufRead + Send> LineReader for ScriptedReader<R> {
    fn read_line(&mut self, _prompt: &str, _secret: bool) -> std::io::Result<String> {
        let mut line = String::new();
        if self.0.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no more input",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Answer shared by every prompt of a process
pub type SharedReader = Arc<Mutex<Box<dyn LineReader>>>;

pub fn terminal_reader() -> SharedReader {
    Arc::new(Mutex::new(Box::new(TerminalReader)))
}

/// What a prompt asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    String,
    Password,
    /// Stored as `yes` or `no`
    Bool,
    /// One of the listed options
    Selection(Vec<String>),
}

impl PromptKind {
    pub fn from_spec(spec: &JewelSpec) -> Result<Self> {
        match spec.kind.as_deref().unwrap_or("string") {
            "string" => Ok(Self::String),
            "password" => Ok(Self::Password),
            "bool" => Ok(Self::Bool),
            "selection" => Ok(Self::Selection(spec.options.clone())),
            other => Err(CoreError::SecretBackend {
                jewel: spec.name.clone(),
                message: format!("unknown prompt type '{}'", other),
            }),
        }
    }

    /// Validate and normalize an answer
    pub fn accept(&self, answer: &str) -> std::result::Result<String, String> {
        let answer = answer.trim();
        match self {
            Self::String | Self::Password if answer.is_empty() => {
                Err("an answer is required".to_string())
            }
            Self::String | Self::Password => Ok(answer.to_string()),
            Self::Bool => match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" => Ok("yes".to_string()),
                "n" | "no" | "false" => Ok("no".to_string()),
                _ => Err(format!("'{}' is not yes or no", answer)),
            },
            Self::Selection(options) => {
                if options.iter().any(|o| o == answer) {
                    Ok(answer.to_string())
                } else {
                    Err(format!(
                        "'{}' is not one of: {}",
                        answer,
                        options.join(", ")
                    ))
                }
            }
        }
    }

    fn hint(&self) -> String {
        match self {
            Self::Bool => " [yes/no]".to_string(),
            Self::Selection(options) => format!(" [{}]", options.join("/")),
            _ => String::new(),
        }
    }
}

/// Asks a human for every missing key
pub struct PromptBackend {
    jewel: String,
    description: Option<String>,
    kind: PromptKind,
    keys: Vec<String>,
    reader: SharedReader,
}

impl PromptBackend {
    pub fn new(spec: &JewelSpec, reader: SharedReader) -> Result<Self> {
        Ok(Self {
            jewel: spec.name.clone(),
            description: spec.description.clone(),
            kind: PromptKind::from_spec(spec)?,
            keys: spec.keys(),
            reader,
        })
    }

    fn prompt_for(&self, key: &str) -> String {
        let label = self.description.as_deref().unwrap_or(&self.jewel);
        if self.keys.len() == 1 {
            format!("{}{}: ", label, self.kind.hint())
        } else {
            format!("{} ({}){}: ", label, key, self.kind.hint())
        }
    }
}

#[async_trait]
impl JewelBackend for PromptBackend {
    fn name(&self) -> &str {
        "prompt"
    }

    fn keys(&self) -> BTreeMap<String, JewelKey> {
        self.keys
            .iter()
            .map(|k| {
                (
                    k.clone(),
                    JewelKey {
                        description: self.description.clone(),
                    },
                )
            })
            .collect()
    }

    async fn apply(&self, existing: &JewelValue) -> Result<JewelValue> {
        let missing: Vec<(String, String)> = self
            .keys
            .iter()
            .filter(|k| !existing.contains_key(*k))
            .map(|k| (k.clone(), self.prompt_for(k)))
            .collect();
        let reader = self.reader.clone();
        let kind = self.kind.clone();
        let jewel = self.jewel.clone();
        let secret = kind == PromptKind::Password;

        tokio::task::spawn_blocking(move || {
            let failure = |message: String| CoreError::SecretBackend {
                jewel: jewel.clone(),
                message,
            };
            let mut reader = reader
                .lock()
                .map_err(|_| failure("prompt input is poisoned".to_string()))?;
            let mut produced = JewelValue::new();
            for (key, prompt) in missing {
                let answer = reader
                    .read_line(&prompt, secret)
                    .map_err(|e| failure(format!("reading answer: {}", e)))?;
                produced.insert(key, kind.accept(&answer).map_err(failure)?);
            }
            Ok(produced)
        })
        .await
        .map_err(|e| CoreError::SecretBackend {
            jewel: self.jewel.clone(),
            message: e.to_string(),
        })?
    }
}

// =============================================================================
// GENERATED
// =============================================================================

/// Character sets for generated credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// a-zA-Z0-9
    #[default]
    Alphanumeric,
    Alpha,
    Numeric,
    Hex,
    Base64,
    UrlSafe,
}

impl Charset {
    pub const fn chars(&self) -> &'static [u8] {
        match self {
            Self::Alphanumeric => b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
            Self::Alpha => b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
            Self::Numeric => b"0123456789",
            Self::Hex => b"0123456789abcdef",
            Self::Base64 => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
            Self::UrlSafe => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "alphanumeric" | "alnum" => Some(Self::Alphanumeric),
            "alpha" => Some(Self::Alpha),
            "numeric" | "num" | "digits" => Some(Self::Numeric),
            "hex" => Some(Self::Hex),
            "base64" => Some(Self::Base64),
            "urlsafe" | "url" => Some(Self::UrlSafe),
            _ => None,
        }
    }
}

/// Random credentials for every missing key
#[derive(Debug, Clone)]
pub struct GeneratedBackend {
    keys: Vec<String>,
    length: usize,
    charset: Charset,
}

impl GeneratedBackend {
    pub const DEFAULT_LENGTH: usize = 32;

    pub fn new(spec: &JewelSpec) -> Result<Self> {
        let charset = match spec.charset.as_deref() {
            None => Charset::default(),
            Some(name) => Charset::parse(name).ok_or_else(|| CoreError::SecretBackend {
                jewel: spec.name.clone(),
                message: format!("unknown charset '{}'", name),
            })?,
        };
        let length = spec.length.unwrap_or(Self::DEFAULT_LENGTH);
        if length == 0 {
            return Err(CoreError::SecretBackend {
                jewel: spec.name.clone(),
                message: "length must be positive".to_string(),
            });
        }
        Ok(Self {
            keys: spec.keys(),
            length,
            charset,
        })
    }

    fn generate(&self, rng: &mut StdRng) -> String {
        let chars = self.charset.chars();
        (0..self.length)
            .map(|_| chars[rng.random_range(0..chars.len())] as char)
            .collect()
    }
}

#[async_trait]
impl JewelBackend for GeneratedBackend {
    fn name(&self) -> &str {
        "generated"
    }

    fn keys(&self) -> BTreeMap<String, JewelKey> {
        self.keys
            .iter()
            .map(|k| (k.clone(), JewelKey::default()))
            .collect()
    }

    async fn apply(&self, existing: &JewelValue) -> Result<JewelValue> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        Ok(self
            .keys
            .iter()
            .filter(|k| !existing.contains_key(*k))
            .map(|k| (k.clone(), self.generate(&mut rng)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn spec(yaml: &str) -> JewelSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn reader(input: &str) -> SharedReader {
        Arc::new(Mutex::new(Box::new(ScriptedReader(Cursor::new(
            input.to_string().into_bytes(),
        )))))
    }

    #[test]
    fn test_prompt_kinds() {
        assert_eq!(PromptKind::Bool.accept("Y").unwrap(), "yes");
        assert_eq!(PromptKind::Bool.accept("false").unwrap(), "no");
        assert!(PromptKind::Bool.accept("maybe").is_err());

        let selection = PromptKind::Selection(vec!["eu".into(), "us".into()]);
        assert_eq!(selection.accept(" us ").unwrap(), "us");
        assert!(selection.accept("asia").is_err());
        assert!(PromptKind::String.accept("").is_err());
    }

    #[tokio::test]
    async fn test_prompt_fills_missing_keys_only() {
        let spec = spec("name: db\ntype: string\nkeys: [user, host]\n");
        let backend = PromptBackend::new(&spec, reader("db.local\n")).unwrap();

        let existing = JewelValue::from([("user".to_string(), "admin".to_string())]);
        let produced = backend.apply(&existing).await.unwrap();

        assert_eq!(produced.len(), 1);
        assert_eq!(produced["host"], "db.local");
    }

    #[tokio::test]
    async fn test_prompt_rejects_invalid_answer() {
        let spec = spec("name: tls\ntype: bool\n");
        let backend = PromptBackend::new(&spec, reader("perhaps\n")).unwrap();
        let err = backend.apply(&JewelValue::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::SecretBackend { .. }));
    }

    #[tokio::test]
    async fn test_generated_length_and_charset() {
        let spec = spec("name: token\nlength: 16\ncharset: hex\nkeys: [a, b]\n");
        let backend = GeneratedBackend::new(&spec).unwrap();

        let produced = backend.apply(&JewelValue::new()).await.unwrap();
        assert_eq!(produced.len(), 2);
        for value in produced.values() {
            assert_eq!(value.len(), 16);
            assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_ne!(produced["a"], produced["b"]);
    }

    #[test]
    fn test_generated_rejects_unknown_charset() {
        assert!(GeneratedBackend::new(&spec("name: x\ncharset: emoji\n")).is_err());
    }
}
