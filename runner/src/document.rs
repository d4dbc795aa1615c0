use serde::{de::DeserializeOwned, Serialize};
use serde_yaml::{Mapping, Value};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::trace;

/// key mirroring the lifecycle status inside every case config document
pub const STATUS_KEY: &str = "simulation_status";

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Failed to serialize {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Key '{key}' of '{chain}' not found in document")]
    MissingKey { chain: String, key: String },
    #[error("Key '{key}' of '{chain}' is not a mapping")]
    NotAMapping { chain: String, key: String },
    #[error("Empty key chain")]
    EmptyKey,
}

/// read and deserialize a YAML file
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, DocumentError> {
    let file = File::open(path).map_err(|source| DocumentError::Io {
        path: path.to_owned(),
        source,
    })?;

    serde_yaml::from_reader(file).map_err(|source| DocumentError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// serialize into a sibling temporary file, then rename it over `path`
pub fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DocumentError> {
    let serialized = serde_yaml::to_string(value).map_err(|source| DocumentError::Serialize {
        path: path.to_owned(),
        source,
    })?;

    let io_error = |source| DocumentError::Io {
        path: path.to_owned(),
        source,
    };

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    let temporary = path.with_file_name(format!(".{name}.tmp.{}", std::process::id()));

    let mut file = File::create(&temporary).map_err(io_error)?;
    file.write_all(serialized.as_bytes()).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    fs::rename(&temporary, path).map_err(io_error)?;

    trace!(path = ?path, "Wrote document");

    Ok(())
}

/// Overwrite the value at `chain` (segments split by `separator`). Every intermediate
/// segment has to exist and hold a mapping, the last one is inserted if missing.
pub fn update_nested(
    root: &mut Value,
    chain: &str,
    separator: &str,
    value: Value,
) -> Result<(), DocumentError> {
    let keys: Vec<&str> = chain.split(separator).collect();
    let (last, intermediate) = match keys.split_last() {
        Some((last, _)) if last.is_empty() && keys.len() == 1 => {
            return Err(DocumentError::EmptyKey)
        }
        Some(split) => split,
        None => return Err(DocumentError::EmptyKey),
    };

    let mut current = as_mapping(root, chain, "")?;

    for key in intermediate {
        let next = current
            .get_mut(*key)
            .ok_or_else(|| DocumentError::MissingKey {
                chain: chain.to_owned(),
                key: (*key).to_owned(),
            })?;

        current = as_mapping(next, chain, key)?;
    }

    current.insert(Value::from(*last), value);

    Ok(())
}

/// look up the value at `chain`, if every segment exists
pub fn get_nested<'a>(root: &'a Value, chain: &str, separator: &str) -> Option<&'a Value> {
    chain
        .split(separator)
        .try_fold(root, |current, key| current.as_mapping()?.get(key))
}

fn as_mapping<'a>(
    value: &'a mut Value,
    chain: &str,
    key: &str,
) -> Result<&'a mut Mapping, DocumentError> {
    value
        .as_mapping_mut()
        .ok_or_else(|| DocumentError::NotAMapping {
            chain: chain.to_owned(),
            key: key.to_owned(),
        })
}

/// The nested configuration document of a single case
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigDocument {
    path: PathBuf,
    root: Value,
}

impl ConfigDocument {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let root = match read_yaml::<Value>(path)? {
            // an empty file parses as null
            Value::Null => Value::Mapping(Mapping::new()),
            root => root,
        };

        Ok(Self {
            path: path.to_owned(),
            root,
        })
    }

    pub fn save(&self) -> Result<(), DocumentError> {
        write_yaml_atomic(&self.path, &self.root)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn update(&mut self, chain: &str, separator: &str, value: Value) -> Result<(), DocumentError> {
        update_nested(&mut self.root, chain, separator, value)
    }

    pub fn get(&self, chain: &str, separator: &str) -> Option<&Value> {
        get_nested(&self.root, chain, separator)
    }

    pub fn set_status(&mut self, status: &str) -> Result<(), DocumentError> {
        match self.root.as_mapping_mut() {
            Some(mapping) => {
                mapping.insert(Value::from(STATUS_KEY), Value::from(status));
                Ok(())
            }
            None => Err(DocumentError::NotAMapping {
                chain: STATUS_KEY.to_owned(),
                key: String::new(),
            }),
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.root.get(STATUS_KEY).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod document_test;
