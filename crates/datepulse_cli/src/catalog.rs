//! Persona catalog files.
//!
//! ```toml
//! [[persona]]
//! name = "Burned-Out Swiper"
//! keywords = ["dating apps", "swiping"]
//! pain_points = ["endless small talk"]
//! ```

use anyhow::{Context, Result};
use datepulse_core::{Persona, Store};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    persona: Vec<Persona>,
}

pub fn parse_catalog(text: &str) -> Result<Vec<Persona>> {
    let file: CatalogFile = toml::from_str(text).context("Failed to parse persona catalog")?;
    let mut seen = HashSet::new();
    for persona in &file.persona {
        if persona.name.trim().is_empty() {
            anyhow::bail!("Persona catalog contains an entry without a name");
        }
        if !seen.insert(persona.name.as_str()) {
            anyhow::bail!("Persona '{}' is defined twice", persona.name);
        }
    }
    Ok(file.persona)
}

/// Upsert every persona in the file, matching existing ones by name.
pub async fn import_catalog(store: &dyn Store, path: &Path) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read persona catalog: {}", path.display()))?;
    let personas = parse_catalog(&text)?;
    for persona in &personas {
        store
            .upsert_persona(persona)
            .await
            .with_context(|| format!("Failed to store persona '{}'", persona.name))?;
    }
    Ok(personas.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog() {
        let text = r#"
[[persona]]
name = "Burned-Out Swiper"
description = "Tired of the apps"
keywords = ["dating apps", "swiping"]
pain_points = ["endless small talk"]

[[persona]]
name = "Slow Burner"
typical_behaviors = ["long conversations before meeting"]
"#;
        let personas = parse_catalog(text).unwrap();
        assert_eq!(personas.len(), 2);
        assert_eq!(personas[0].keywords, vec!["dating apps", "swiping"]);
        assert!(personas[1].pain_points.is_empty());
        assert_ne!(personas[0].id, personas[1].id);
    }

    #[test]
    fn test_rejects_duplicates_and_blank_names() {
        let dup = "[[persona]]\nname = \"A\"\n[[persona]]\nname = \"A\"\n";
        assert!(parse_catalog(dup).is_err());
        let blank = "[[persona]]\nname = \" \"\n";
        assert!(parse_catalog(blank).is_err());
        assert!(parse_catalog("").unwrap().is_empty());
    }
}
