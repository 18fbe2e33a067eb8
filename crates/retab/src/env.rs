//! environment exposed to documents as `env`
//!
//! Later sources win: `.env`, the process environment, then the package metadata of a `Cargo.toml` in the
//! work directory (`CARGO_PKG_NAME`, `CARGO_PKG_VERSION`, `CARGO_PKG_RUST_VERSION`).
use indexmap::IndexMap;
use std::path::Path;

pub const DOTENV_FILE: &str = ".env";
pub const MANIFEST_FILE: &str = "Cargo.toml";

/// Parse `KEY=value` lines, skipping blank lines and `#` comments
pub fn parse_dotenv(contents: &str) -> IndexMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// `[package]` fields of a cargo manifest, fields inherited from a workspace are skipped
pub fn parse_manifest(contents: &str) -> Result<IndexMap<String, String>, toml::de::Error> {
    let manifest: toml::Table = contents.parse()?;
    let package = manifest.get("package").and_then(toml::Value::as_table);

    let mut env = IndexMap::new();
    for (field, key) in [
        ("name", "CARGO_PKG_NAME"),
        ("version", "CARGO_PKG_VERSION"),
        ("rust-version", "CARGO_PKG_RUST_VERSION"),
    ] {
        let value = package
            .and_then(|package| package.get(field))
            .and_then(toml::Value::as_str);
        if let Some(value) = value {
            env.insert(key.to_string(), value.to_string());
        }
    }
    Ok(env)
}

fn load_manifest(dir: &Path) -> IndexMap<String, String> {
    let path = dir.join(MANIFEST_FILE);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return IndexMap::new();
    };

    match parse_manifest(&contents) {
        Ok(env) => env,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "unable to read package metadata");
            IndexMap::new()
        }
    }
}

/// `.env` in `dir` overlaid with the process environment and package metadata
pub fn load_env(dir: &Path) -> IndexMap<String, String> {
    let path = dir.join(DOTENV_FILE);
    let mut env = match std::fs::read_to_string(&path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "loaded dotenv file");
            parse_dotenv(&contents)
        }
        Err(err) => {
            tracing::trace!(path = %path.display(), %err, "no dotenv file");
            IndexMap::new()
        }
    };

    env.extend(std::env::vars());
    env.extend(load_manifest(dir));
    env.sort_keys();
    env
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dotenv_lines() {
        let env = parse_dotenv(
            r#"
            # registry settings
            REGISTRY=ghcr.io
            export TAG="v1.2"
            NAME='retab'
            EMPTY=
            not a pair
            "#,
        );

        assert_eq!(
            env,
            IndexMap::from([
                ("REGISTRY".to_string(), "ghcr.io".to_string()),
                ("TAG".to_string(), "v1.2".to_string()),
                ("NAME".to_string(), "retab".to_string()),
                ("EMPTY".to_string(), String::new()),
            ])
        );
    }

    #[test]
    fn package_metadata() {
        let env = parse_manifest(
            r#"
            [package]
            name = "deploy"
            version = "0.3.1"
            edition.workspace = true

            [dependencies]
            serde = "1"
            "#,
        )
        .unwrap();

        assert_eq!(
            env,
            IndexMap::from([
                ("CARGO_PKG_NAME".to_string(), "deploy".to_string()),
                ("CARGO_PKG_VERSION".to_string(), "0.3.1".to_string()),
            ])
        );
        assert!(parse_manifest("[package").is_err());
        assert_eq!(parse_manifest("[workspace]").unwrap(), IndexMap::<String, String>::new());
    }

    #[test]
    fn manifest_overrides_the_environment() {
        let dir = std::env::temp_dir().join(format!("retab-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DOTENV_FILE), "CARGO_PKG_NAME=from-dotenv\nRETAB_ENV_TEST_STAGE=dev\n").unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "[package]\nname = \"site\"\n").unwrap();

        let env = load_env(&dir);
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(env.get("CARGO_PKG_NAME").map(String::as_str), Some("site"));
        assert_eq!(env.get("RETAB_ENV_TEST_STAGE").map(String::as_str), Some("dev"));
    }
}
