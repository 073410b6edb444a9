//! Class name lookup for detector outputs

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::DetectionError;

/// Ordered list of class names, indexed by `Detection::class_index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// Name for a class index, `"unknown"` when out of range
    #[must_use]
    pub fn name(&self, class_index: usize) -> &str {
        self.0.get(class_index).map_or("unknown", String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ClassNames {
    fn default() -> Self {
        Self(vec!["fire".to_string()])
    }
}

/// `names:` may be a plain list or an index map, as in YOLO data files
#[derive(Deserialize)]
#[serde(untagged)]
enum NamesField {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

#[derive(Deserialize)]
struct NamesFile {
    names: NamesField,
}

/// Parse class names from YAML text
pub fn parse_class_names(yaml: &str) -> Result<ClassNames, DetectionError> {
    let file: NamesFile =
        serde_yaml::from_str(yaml).map_err(|e| DetectionError::ClassNames(e.to_string()))?;

    let names = match file.names {
        NamesField::List(names) => names,
        NamesField::Map(map) => {
            let len = map.keys().next_back().map_or(0, |max| max + 1);
            let mut names = vec!["unknown".to_string(); len];
            for (idx, name) in map {
                names[idx] = name;
            }
            names
        }
    };

    if names.is_empty() {
        return Err(DetectionError::ClassNames("names list is empty".to_string()));
    }

    Ok(ClassNames::new(names))
}

/// Load class names from a YAML file with a `names:` entry
pub fn load_class_names(path: impl AsRef<Path>) -> Result<ClassNames, DetectionError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DetectionError::ClassNames(format!("{}: {e}", path.display())))?;
    let names = parse_class_names(&contents)?;
    info!("Loaded {} class names from {}", names.len(), path.display());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_fire() {
        let names = ClassNames::default();
        assert_eq!(names.name(0), "fire");
        assert_eq!(names.name(3), "unknown");
    }

    #[test]
    fn test_parse_list() {
        let names = parse_class_names("names: [fire, smoke]\n").unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names.name(1), "smoke");
    }

    #[test]
    fn test_parse_index_map() {
        let names = parse_class_names("names:\n  0: fire\n  2: smoke\n").unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.name(0), "fire");
        assert_eq!(names.name(1), "unknown");
        assert_eq!(names.name(2), "smoke");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_class_names("names: []\n").is_err());
        assert!(parse_class_names("other: 1\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "names:\n  - fire").unwrap();
        let names = load_class_names(file.path()).unwrap();
        assert_eq!(names, ClassNames::default());
    }
}
