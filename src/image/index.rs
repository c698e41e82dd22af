//! Local image enumeration and candidate selection

use crate::image::ImageRef;
use crate::image::glob::matches_any;
use crate::transfer::job::TransferJob;

/// An image known to the local runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalImage {
    pub id: String,
    /// `repository:tag` references pointing at this image
    pub tags: Vec<String>,
    /// `repository@sha256:...` entries recorded by earlier pulls and pushes
    pub repo_digests: Vec<String>,
    pub size: Option<u64>,
}

impl LocalImage {
    /// Manifest digests the image is known under, without repository names
    pub fn digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = self
            .repo_digests
            .iter()
            .filter_map(|entry| entry.split_once('@').map(|(_, d)| d.to_string()))
            .collect();
        digests.sort();
        digests.dedup();
        digests
    }

    pub fn has_digest(&self, digest: &str) -> bool {
        self.repo_digests
            .iter()
            .any(|entry| entry.split_once('@').is_some_and(|(_, d)| d == digest))
    }
}

/// Result of looking at a single local reference
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    AlreadyAtTarget,
    NotMatched,
    Candidate(ImageRef, ImageRef),
}

/// Name/tag filters plus the repository the jobs are aimed at
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    name_globs: Vec<String>,
    tag_globs: Vec<String>,
    target_repo: String,
    source_repo: Option<String>,
    tag_rewrite: Option<(String, String)>,
}

impl CandidateFilter {
    pub fn new(name_globs: &[String], tag_globs: &[String], target_repo: &str) -> Self {
        Self {
            name_globs: name_globs.to_vec(),
            tag_globs: tag_globs.to_vec(),
            target_repo: target_repo.trim_end_matches('/').to_string(),
            source_repo: None,
            tag_rewrite: None,
        }
    }

    /// Only consider references under this repository prefix
    pub fn with_source_repo(mut self, source_repo: Option<String>) -> Self {
        self.source_repo = source_repo.map(|s| s.trim_end_matches('/').to_string());
        self
    }

    /// Keep only tag `from` and push it as tag `to`
    pub fn with_tag_rewrite(mut self, from: &str, to: &str) -> Self {
        self.tag_rewrite = Some((from.to_string(), to.to_string()));
        self
    }

    pub fn classify(&self, reference: &str) -> Classification {
        let Ok(source) = ImageRef::parse(reference) else {
            return Classification::NotMatched;
        };

        if source.starts_with(&self.target_repo) {
            return Classification::AlreadyAtTarget;
        }
        if let Some(prefix) = &self.source_repo {
            if !source.starts_with(prefix) {
                return Classification::NotMatched;
            }
        }
        if !matches_any(&self.name_globs, &source.name) || !matches_any(&self.tag_globs, &source.tag)
        {
            return Classification::NotMatched;
        }

        let target_tag = match &self.tag_rewrite {
            Some((from, _)) if *from != source.tag => return Classification::NotMatched,
            Some((_, to)) => to.as_str(),
            None => source.tag.as_str(),
        };

        match ImageRef::in_repository(&self.target_repo, &source.name, target_tag) {
            Ok(target) => Classification::Candidate(source, target),
            Err(_) => Classification::NotMatched,
        }
    }

    /// One job per matching tagged reference, in listing order
    pub fn select(&self, local_images: &[LocalImage]) -> Vec<TransferJob> {
        local_images
            .iter()
            .flat_map(|image| image.tags.iter())
            .filter(|tag| !tag.starts_with("<none>"))
            .filter_map(|tag| match self.classify(tag) {
                Classification::Candidate(source, target) => {
                    Some(TransferJob::push(source, target))
                }
                _ => None,
            })
            .collect()
    }
}

/// Select transfer candidates among local images. See [`CandidateFilter`].
pub fn select_candidates(
    local_images: &[LocalImage],
    name_globs: &[String],
    tag_globs: &[String],
    target_repo_prefix: &str,
) -> Vec<TransferJob> {
    CandidateFilter::new(name_globs, tag_globs, target_repo_prefix).select(local_images)
}
