//! Repository `.git/config` reader and writer.
//!
//! Only the repository file is consulted. The host's `~/.gitconfig` and
//! system config are never read, so identity and remotes come solely from
//! what llmgit itself wrote.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    /// Lowercased section name (`core`, `user`, `remote`)
    name: String,
    /// Subsection, case preserved (`origin` in `[remote "origin"]`)
    subsection: Option<String>,
    entries: Vec<(String, String)>,
}

impl Section {
    fn matches(&self, name: &str, subsection: Option<&str>) -> bool {
        self.name == name && self.subsection.as_deref() == subsection
    }
}

/// Parsed `.git/config`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ConfigFile {
    sections: Vec<Section>,
}

/// Split `remote.origin.url` into `("remote", Some("origin"), "url")`.
fn split_key(key: &str) -> Result<(String, Option<String>, String)> {
    let (section, rest) = key
        .split_once('.')
        .ok_or_else(|| Error::invalid(format!("invalid config key: {}", key)))?;
    let (subsection, name) = match rest.rsplit_once('.') {
        Some((sub, name)) => (Some(sub.to_string()), name),
        None => (None, rest),
    };
    if section.is_empty() || name.is_empty() {
        return Err(Error::invalid(format!("invalid config key: {}", key)));
    }
    Ok((section.to_lowercase(), subsection, name.to_lowercase()))
}

impl ConfigFile {
    fn path(git_dir: &Path) -> PathBuf {
        git_dir.join("config")
    }

    pub async fn load(fs: &dyn FileSystem, git_dir: &Path) -> Result<Self> {
        match fs.read_file(&Self::path(git_dir)).await {
            Ok(data) => Ok(Self::parse(&String::from_utf8_lossy(&data))),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, fs: &dyn FileSystem, git_dir: &Path) -> Result<()> {
        fs.write_file(&Self::path(git_dir), self.render().as_bytes())
            .await
    }

    pub fn parse(content: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let header = &line[1..line.len() - 1];
                let (name, subsection) = match header.split_once(' ') {
                    Some((name, sub)) => (name, Some(sub.trim().trim_matches('"').to_string())),
                    None => (header, None),
                };
                sections.push(Section {
                    name: name.trim().to_lowercase(),
                    subsection,
                    entries: Vec::new(),
                });
                continue;
            }

            if let Some(section) = sections.last_mut() {
                let (key, value) = match line.split_once('=') {
                    Some((k, v)) => (k.trim(), v.trim()),
                    None => (line, "true"),
                };
                section
                    .entries
                    .push((key.to_lowercase(), value.trim_matches('"').to_string()));
            }
        }

        Self { sections }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match &section.subsection {
                Some(sub) => out.push_str(&format!("[{} \"{}\"]\n", section.name, sub)),
                None => out.push_str(&format!("[{}]\n", section.name)),
            }
            for (key, value) in &section.entries {
                out.push_str(&format!("\t{} = {}\n", key, value));
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let (name, subsection, entry) = split_key(key).ok()?;
        self.sections
            .iter()
            .filter(|s| s.matches(&name, subsection.as_deref()))
            .flat_map(|s| s.entries.iter())
            .rev()
            .find(|(k, _)| *k == entry)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (name, subsection, entry) = split_key(key)?;

        let index = match self
            .sections
            .iter()
            .position(|s| s.matches(&name, subsection.as_deref()))
        {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name,
                    subsection,
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };

        let section = &mut self.sections[index];
        match section.entries.iter_mut().find(|(k, _)| *k == entry) {
            Some((_, existing)) => *existing = value.to_string(),
            None => section.entries.push((entry, value.to_string())),
        }
        Ok(())
    }

    /// Remove `[name "subsection"]`; returns whether it existed.
    pub fn remove_section(&mut self, name: &str, subsection: Option<&str>) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| !s.matches(name, subsection));
        self.sections.len() != before
    }

    /// Subsection names of every `[name "..."]` section, in file order.
    pub fn subsections(&self, name: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == name)
            .filter_map(|s| s.subsection.as_deref())
            .collect()
    }
}
