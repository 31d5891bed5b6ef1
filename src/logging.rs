use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::json;

use crate::{config::parse_env_bool01, error::Result};

pub const LOG_JSON_PATH_ENV: &str = "UIVERIFY_LOG_JSON_PATH";
pub const LOG_ECHO_ENV: &str = "UIVERIFY_LOG_ECHO";

/// Console + JSON-lines logger shared across the classifier, capture workers
/// and the verifier. Clones write to the same sink.
#[derive(Clone)]
pub struct Logger {
    component: &'static str,
    echo: bool,
    json_file: Option<Arc<Mutex<File>>>,
}

impl Logger {
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(LOG_JSON_PATH_ENV).ok();
        let echo = parse_env_bool01(LOG_ECHO_ENV, true)?;
        Self::new(path.map(PathBuf::from), echo)
    }

    pub fn new(path: Option<PathBuf>, echo: bool) -> Result<Self> {
        let json_file = match path {
            Some(path) => {
                ensure_parent_dir(&path)?;
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };
        Ok(Self {
            component: "uiverify",
            echo,
            json_file,
        })
    }

    pub fn quiet() -> Self {
        Self {
            component: "uiverify",
            echo: false,
            json_file: None,
        }
    }

    pub fn component(&self, component: &'static str) -> Self {
        Self {
            component,
            ..self.clone()
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        if self.echo {
            println!("{}: {}", self.component, message.as_ref());
        }
        self.event("info", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        if self.echo {
            eprintln!("{}: {}", self.component, message.as_ref());
        }
        self.event("warn", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        if self.echo {
            eprintln!("{}: {}", self.component, message.as_ref());
        }
        self.event("error", message.as_ref());
    }

    pub fn event(&self, level: &str, message: &str) {
        let Some(file) = &self.json_file else {
            return;
        };

        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let entry = json!({
            "ts_ms": ts_ms,
            "level": level,
            "component": self.component,
            "msg": message,
        });

        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(file, "{}", entry);
        let _ = file.flush();
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::quiet()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component)
            .field("echo", &self.echo)
            .field("json", &self.json_file.is_some())
            .finish()
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
