//! Grouping staged files into per-applicant bundles.
//!
//! Explicit sidecar declarations win, container files stand alone, and every
//! other file is grouped greedily by modification time and name similarity.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Tokens that describe a document rather than the applicant.
const GENERIC_TOKENS: &[&str] = &[
    "resume",
    "cv",
    "cover",
    "letter",
    "coverletter",
    "application",
    "app",
    "candidate",
    "portfolio",
    "references",
    "reference",
    "transcript",
    "final",
    "updated",
    "copy",
    "draft",
    "doc",
    "document",
    "attachment",
    "meta",
    "metadata",
    "com",
    "org",
    "net",
    "mail",
    "gmail",
];

/// One file sitting in the staging directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl StagedFile {
    /// Lowercased extension without the dot.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }

    /// File stem with any `.meta` suffix removed.
    pub fn stem(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        stem.strip_suffix(".meta").unwrap_or(&stem).to_string()
    }
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Why a cluster was formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterOrigin {
    Sidecar,
    Container,
    Proximity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub origin: ClusterOrigin,
    pub files: Vec<StagedFile>,
}

impl Cluster {
    fn new(origin: ClusterOrigin, first: StagedFile) -> Self {
        Self {
            origin,
            files: vec![first],
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|file| file.name.clone()).collect()
    }
}

/// A sidecar's explicit claim over sibling files.
#[derive(Debug, Clone)]
pub struct DeclaredGroup {
    pub sidecar: String,
    pub members: Vec<String>,
}

/// Tunables for the proximity pass.
#[derive(Debug, Clone)]
pub struct ClusterRules {
    pub window: Duration,
    pub similarity_threshold: f64,
    pub container_extensions: Vec<String>,
}

/// Partition staged files into clusters.
///
/// Every input file lands in exactly one cluster; output clusters are ordered
/// by the modification time of their first file.
pub fn cluster_files(
    files: &[StagedFile],
    declared: &[DeclaredGroup],
    rules: &ClusterRules,
) -> Vec<Cluster> {
    let mut sorted = files.to_vec();
    sorted.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    let mut clusters = Vec::new();

    for group in declared {
        if claimed.contains(&group.sidecar) {
            continue;
        }
        let mut members: Vec<StagedFile> = sorted
            .iter()
            .filter(|file| {
                !claimed.contains(&file.name)
                    && (file.name == group.sidecar || group.members.contains(&file.name))
            })
            .cloned()
            .collect();
        // A sidecar that claims nothing still present falls through to proximity.
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        claimed.extend(members.iter().map(|file| file.name.clone()));
        clusters.push(Cluster {
            origin: ClusterOrigin::Sidecar,
            files: members,
        });
    }

    for file in &sorted {
        if claimed.contains(&file.name) {
            continue;
        }
        if rules.container_extensions.contains(&file.extension()) {
            claimed.insert(file.name.clone());
            clusters.push(Cluster::new(ClusterOrigin::Container, file.clone()));
        }
    }

    let mut current: Option<Cluster> = None;
    for file in sorted.into_iter().filter(|file| !claimed.contains(&file.name)) {
        let joins = current
            .as_ref()
            .is_some_and(|cluster| accepts(cluster, &file, rules));
        if joins {
            if let Some(cluster) = current.as_mut() {
                cluster.files.push(file);
            }
            continue;
        }
        if let Some(done) = current.take() {
            clusters.push(done);
        }
        current = Some(Cluster::new(ClusterOrigin::Proximity, file));
    }
    if let Some(done) = current {
        clusters.push(done);
    }

    clusters.sort_by(|a, b| {
        let a_first = a.files.first().map(|file| file.modified);
        let b_first = b.files.first().map(|file| file.modified);
        a_first.cmp(&b_first)
    });
    clusters
}

fn accepts(cluster: &Cluster, file: &StagedFile, rules: &ClusterRules) -> bool {
    let Some(last) = cluster.files.last() else {
        return false;
    };
    if file.modified.signed_duration_since(last.modified) > rules.window {
        return false;
    }
    let stem = file.stem();
    cluster
        .files
        .iter()
        .any(|member| name_similarity(&member.stem(), &stem) > rules.similarity_threshold)
}

/// Informative name tokens of a file stem.
pub fn name_tokens(stem: &str) -> Vec<String> {
    stem.to_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| token.len() >= 2)
        .filter(|token| !token.chars().all(|ch| ch.is_ascii_digit()))
        .filter(|token| !GENERIC_TOKENS.contains(token))
        .map(String::from)
        .collect()
}

/// Similarity of two file stems in `[0, 1]`.
///
/// The larger of token Jaccard overlap and normalized edit similarity over the
/// informative tokens. Stems with no informative tokens never match.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a_tokens = name_tokens(a);
    let b_tokens = name_tokens(b);
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let a_set: BTreeSet<&String> = a_tokens.iter().collect();
    let b_set: BTreeSet<&String> = b_tokens.iter().collect();
    let shared = a_set.intersection(&b_set).count() as f64;
    let union = a_set.union(&b_set).count() as f64;
    let jaccard = shared / union;

    let a_joined = a_tokens.join("-");
    let b_joined = b_tokens.join("-");
    let longest = a_joined.chars().count().max(b_joined.chars().count()) as f64;
    let edit = 1.0 - levenshtein(&a_joined, &b_joined) as f64 / longest;

    jaccard.max(edit)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut row = vec![0; b_chars.len() + 1];
    for (i, a_ch) in a.chars().enumerate() {
        row[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(a_ch != *b_ch);
            row[j + 1] = substitution.min(previous[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut previous, &mut row);
    }
    previous[b_chars.len()]
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
