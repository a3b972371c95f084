//! Typed manifest and validation
//!
//! The block body is parsed as YAML into a generic value first and then
//! walked field by field, so every rejection names the offending key
//! (`files[1].path`, `target_bin`, ...) instead of surfacing a serde message.

use super::extract::ManifestBlock;
use crate::error::{ScriptistoError, ScriptistoResult};
use serde_yaml::{Mapping, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const KNOWN_KEYS: &[&str] = &[
    "script_src",
    "build_cmd",
    "build_once_cmd",
    "target_bin",
    "target_interpreter",
    "files",
    "replace_shebang_with",
    "build_in_script_dir",
    "extra_src_paths",
];

/// A file written into the cache directory before building
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryFile {
    /// Path relative to the cache directory
    pub path: PathBuf,
    /// Verbatim content
    pub content: String,
}

/// Interpreter prefix used to launch the built artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    /// Split an interpreter string (`"python3 -u"`) with shell quoting rules
    pub fn parse(raw: &str) -> ScriptistoResult<Self> {
        let mut words = shell_words::split(raw)
            .map_err(|e| ScriptistoError::invalid("target_interpreter", e.to_string()))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| ScriptistoError::invalid("target_interpreter", "must not be empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

/// Validated build manifest of one script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptManifest {
    /// File name the script source is materialized under
    pub script_src: PathBuf,
    /// Shell command building the artifact
    pub build_cmd: String,
    /// Shell command run once per cold cache
    pub build_once_cmd: Option<String>,
    /// Artifact location relative to the cache directory
    pub target_bin: PathBuf,
    pub target_interpreter: Option<Interpreter>,
    /// Extra files, in declaration order
    pub files: Vec<AuxiliaryFile>,
    /// Replacement for a leading `#!` line in the materialized source
    pub replace_shebang_with: String,
    pub build_in_script_dir: bool,
    /// Additional inputs folded into the content hash
    pub extra_src_paths: Vec<String>,
}

impl ScriptManifest {
    /// Parse and validate an extracted block
    pub fn from_block(block: &ManifestBlock) -> ScriptistoResult<Self> {
        let value: Value = serde_yaml::from_str(&block.body).map_err(|e| {
            let offset = e.location().map(|loc| loc.line()).unwrap_or(1);
            ScriptistoError::malformed(block.begin_line + offset, e.to_string())
        })?;

        let map = match value {
            Value::Mapping(map) => map,
            Value::Null => {
                return Err(ScriptistoError::ManifestMissingField(
                    "script_src".to_string(),
                ))
            }
            other => {
                return Err(ScriptistoError::malformed(
                    block.begin_line + 1,
                    format!("expected key/value pairs, found {}", kind(&other)),
                ))
            }
        };

        let manifest = Self::from_mapping(&map)?;
        debug!(
            script_src = %manifest.script_src.display(),
            target_bin = %manifest.target_bin.display(),
            files = manifest.files.len(),
            "Manifest parsed"
        );
        Ok(manifest)
    }

    fn from_mapping(map: &Mapping) -> ScriptistoResult<Self> {
        for key in map.keys() {
            match key.as_str() {
                Some(name) if KNOWN_KEYS.contains(&name) => {}
                Some(name) => warn!(key = name, "Ignoring unknown manifest key"),
                None => warn!("Ignoring non-string manifest key"),
            }
        }

        let script_src = relative_path("script_src", &required_str(map, "script_src")?)?;
        let build_cmd = required_str(map, "build_cmd")?;
        let target_bin = relative_path("target_bin", &required_str(map, "target_bin")?)?;

        let build_once_cmd = optional_str(map, "build_once_cmd")?;
        if matches!(&build_once_cmd, Some(cmd) if cmd.trim().is_empty()) {
            return Err(ScriptistoError::invalid(
                "build_once_cmd",
                "must not be empty when present",
            ));
        }

        let target_interpreter = optional_str(map, "target_interpreter")?
            .map(|raw| Interpreter::parse(&raw))
            .transpose()?;

        let files = parse_files(map.get("files"), &script_src)?;

        let replace_shebang_with = optional_str(map, "replace_shebang_with")?.unwrap_or_default();
        if replace_shebang_with.contains('\n') {
            return Err(ScriptistoError::invalid(
                "replace_shebang_with",
                "must be a single line",
            ));
        }

        let build_in_script_dir = match map.get("build_in_script_dir") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(ScriptistoError::invalid(
                    "build_in_script_dir",
                    format!("expected a boolean, found {}", kind(other)),
                ))
            }
        };

        let extra_src_paths = parse_string_list(map.get("extra_src_paths"), "extra_src_paths")?;

        Ok(Self {
            script_src,
            build_cmd,
            build_once_cmd,
            target_bin,
            target_interpreter,
            files,
            replace_shebang_with,
            build_in_script_dir,
            extra_src_paths,
        })
    }

    /// Script bytes as written into the cache directory
    ///
    /// A leading `#!` line is swapped for `replace_shebang_with`; everything
    /// after the first newline, the manifest block included, is kept as is.
    pub fn materialized_source(&self, script: &[u8]) -> Vec<u8> {
        if !script.starts_with(b"#!") {
            return script.to_vec();
        }
        let rest = match script.iter().position(|b| *b == b'\n') {
            Some(pos) => &script[pos..],
            None => &[][..],
        };
        let mut out = Vec::with_capacity(self.replace_shebang_with.len() + rest.len());
        out.extend_from_slice(self.replace_shebang_with.as_bytes());
        out.extend_from_slice(rest);
        out
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn string_value(field: &str, value: &Value) -> ScriptistoResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(ScriptistoError::invalid(
            field,
            format!("expected a string, found {}", kind(other)),
        )),
    }
}

fn required_str(map: &Mapping, key: &str) -> ScriptistoResult<String> {
    let value = match map.get(key) {
        None | Some(Value::Null) => {
            return Err(ScriptistoError::ManifestMissingField(key.to_string()))
        }
        Some(v) => string_value(key, v)?,
    };
    if value.trim().is_empty() {
        return Err(ScriptistoError::invalid(key, "must not be empty"));
    }
    Ok(value)
}

fn optional_str(map: &Mapping, key: &str) -> ScriptistoResult<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => string_value(key, v).map(Some),
    }
}

fn parse_string_list(value: Option<&Value>, field: &str) -> ScriptistoResult<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| string_value(&format!("{field}[{i}]"), item))
            .collect(),
        Some(other) => Err(ScriptistoError::invalid(
            field,
            format!("expected a list, found {}", kind(other)),
        )),
    }
}

/// Validate a path that must stay inside the cache directory
fn relative_path(field: &str, raw: &str) -> ScriptistoResult<PathBuf> {
    let path = Path::new(raw);
    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ScriptistoError::invalid(
                    field,
                    format!("'{raw}' must not contain '..'"),
                ))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ScriptistoError::invalid(
                    field,
                    format!("'{raw}' must be a relative path"),
                ))
            }
        }
    }
    if !has_name {
        return Err(ScriptistoError::invalid(
            field,
            format!("'{raw}' does not name a file"),
        ));
    }
    Ok(path.to_path_buf())
}

/// Normalised form used for duplicate detection (`./a` == `a`)
fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn parse_files(value: Option<&Value>, script_src: &Path) -> ScriptistoResult<Vec<AuxiliaryFile>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items,
        Some(other) => {
            return Err(ScriptistoError::invalid(
                "files",
                format!("expected a list, found {}", kind(other)),
            ))
        }
    };

    let script_key = normalized(script_src);
    let mut seen: Vec<PathBuf> = Vec::with_capacity(items.len());
    let mut files = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let entry = item.as_mapping().ok_or_else(|| {
            ScriptistoError::invalid(
                format!("files[{i}]"),
                format!("expected a mapping with path and content, found {}", kind(item)),
            )
        })?;

        let path_field = format!("files[{i}].path");
        let path = match entry.get("path") {
            None | Some(Value::Null) => {
                return Err(ScriptistoError::ManifestMissingField(path_field))
            }
            Some(v) => relative_path(&path_field, &string_value(&path_field, v)?)?,
        };

        let content_field = format!("files[{i}].content");
        let content = match entry.get("content") {
            None | Some(Value::Null) => {
                return Err(ScriptistoError::ManifestMissingField(content_field))
            }
            Some(v) => string_value(&content_field, v)?,
        };

        let key = normalized(&path);
        if key == script_key {
            return Err(ScriptistoError::invalid(
                path_field,
                "collides with script_src",
            ));
        }
        if seen.contains(&key) {
            return Err(ScriptistoError::invalid(
                path_field,
                format!("duplicate path '{}'", path.display()),
            ));
        }
        seen.push(key);
        files.push(AuxiliaryFile { path, content });
    }

    Ok(files)
}
