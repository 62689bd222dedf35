//! `compile_commands.json` model: each translation unit must carry a
//! `-DPKEY=<N>` define; `N = 0` marks the untrusted compartment and
//! disables rewriting of that file. A missing `-DPKEY` is a fatal error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, RewriterError};

#[derive(Debug, Clone, Deserialize)]
struct RawCommand {
    directory: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    file: String,
}

/// One translation unit's pkey assignment, resolved from its compile
/// command's `-DPKEY=<N>` argument.
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub path: PathBuf,
    pub pkey: u8,
}

/// The parsed `compile_commands.json`, keyed by absolute source path.
#[derive(Debug, Default)]
pub struct CompileDatabase {
    units: BTreeMap<PathBuf, u8>,
}

impl CompileDatabase {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: Vec<RawCommand> = serde_json::from_str(&text)?;
        let mut units = BTreeMap::new();
        for entry in raw {
            let dir = PathBuf::from(&entry.directory);
            let file_path = dir.join(&entry.file);
            let tokens: Vec<String> = match (&entry.arguments, &entry.command) {
                (Some(args), _) => args.clone(),
                (None, Some(cmd)) => cmd.split_whitespace().map(str::to_string).collect(),
                (None, None) => {
                    return Err(RewriterError::MissingPkey {
                        path: entry.file.clone(),
                    })
                }
            };
            let pkey = extract_pkey(&tokens).ok_or_else(|| RewriterError::MissingPkey {
                path: entry.file.clone(),
            })?;
            units.insert(file_path, pkey);
        }
        Ok(CompileDatabase { units })
    }

    pub fn pkey_for(&self, path: &Path) -> Result<u8> {
        self.units
            .get(path)
            .copied()
            .ok_or_else(|| RewriterError::MissingPkey {
                path: path.display().to_string(),
            })
    }

    /// Keep only the given absolute paths, preserving pkey assignments.
    /// The CLI's positional `inputs` list uses this to scope a rewrite run
    /// to a subset of the compile database.
    pub fn restrict_to(&self, paths: &[PathBuf]) -> Self {
        if paths.is_empty() {
            return CompileDatabase {
                units: self.units.clone(),
            };
        }
        let keep: BTreeMap<_, _> = self
            .units
            .iter()
            .filter(|(path, _)| paths.iter().any(|p| p == *path))
            .map(|(path, pkey)| (path.clone(), *pkey))
            .collect();
        CompileDatabase { units: keep }
    }

    pub fn units(&self) -> impl Iterator<Item = CompileUnit> + '_ {
        self.units.iter().map(|(path, &pkey)| CompileUnit {
            path: path.clone(),
            pkey,
        })
    }
}

/// Find and parse a `-DPKEY=<N>` define among a compile command's tokens.
/// Accepts both `-DPKEY=N` and separate `-D PKEY=N` spellings.
fn extract_pkey(tokens: &[String]) -> Option<u8> {
    let mut iter = tokens.iter().peekable();
    while let Some(tok) = iter.next() {
        let define = if let Some(rest) = tok.strip_prefix("-D") {
            if rest.is_empty() {
                iter.next().map(String::as_str)
            } else {
                Some(rest)
            }
        } else {
            None
        };
        if let Some(define) = define {
            if let Some(value) = define.strip_prefix("PKEY=") {
                return value.parse::<u8>().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_pkey_from_combined_define() {
        let tokens = vec!["clang".to_string(), "-DPKEY=2".to_string(), "-c".to_string()];
        assert_eq!(extract_pkey(&tokens), Some(2));
    }

    #[test]
    fn extracts_pkey_from_split_define() {
        let tokens = vec!["clang".to_string(), "-D".to_string(), "PKEY=0".to_string()];
        assert_eq!(extract_pkey(&tokens), Some(0));
    }

    #[test]
    fn missing_pkey_returns_none() {
        let tokens = vec!["clang".to_string(), "-c".to_string()];
        assert_eq!(extract_pkey(&tokens), None);
    }

    #[test]
    fn loads_from_json_and_reports_missing_pkey() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("compile_commands.json");
        let src_path = dir.path().join("a.c");
        std::fs::write(&src_path, "int main(void){return 0;}").unwrap();
        let json = format!(
            r#"[{{"directory": "{}", "command": "clang -DPKEY=1 -c a.c", "file": "a.c"}}]"#,
            dir.path().display()
        );
        std::fs::write(&db_path, json).unwrap();

        let db = CompileDatabase::load(&db_path).unwrap();
        assert_eq!(db.pkey_for(&src_path).unwrap(), 1);
    }
}
