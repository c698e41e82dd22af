//! Subcommand dispatch: builds catalogs, runtime and engine from the config

use crate::cli::args::{
    Cli, Command, ExploreGitlabArgs, ExploreHubArgs, GlobalArgs, PatchArgs, PullArgs,
    TransferArgs,
};
use crate::config::{AppConfig, read_list_file};
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{Result, TransferError};
use crate::image::{CandidateFilter, ImageRef};
use crate::logging::Logger;
use crate::registry::{
    Discovery, DiscoveryOptions, FallbackLogin, GitLabCatalog, HubCatalog, ManifestDigestClient,
    RegistryCatalog, Tag, discover, discover_mirrors,
};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::transfer::{
    EngineOptions, ImagePatcher, Pipeline, ResultRecorder, TransferEngine, TransferJob,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Packages pulled when no packages file is given
pub const DEFAULT_PACKAGES: &[&str] = &[
    "content",
    "category",
    "community",
    "find",
    "dah",
    "omnigroupserver",
    "agentstore",
    "categorisation-agentstore",
    "controller",
    "coordinator",
    "dataadmin",
    "dih",
    "eductionserver",
    "qms",
    "qms-agentstore",
    "siteadmin",
    "statsserver",
    "view",
];

pub const DEFAULT_VERSIONS: &[&str] = &["24.4"];

pub struct Runner {
    command: Command,
    config: AppConfig,
    logger: Logger,
}

impl Runner {
    pub fn new(cli: Cli, config: AppConfig) -> Self {
        let logger = if cli.global.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(cli.global.verbose)
        };
        let config = apply_global_overrides(config, &cli.global);

        Self {
            command: cli.command,
            config,
            logger,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Run the selected subcommand; returns the process exit code
    pub async fn run(&self, cancel: CancellationToken) -> Result<i32> {
        let started = Instant::now();
        let code = match &self.command {
            Command::ExploreGitlab(args) => self.explore_gitlab(args).await?,
            Command::ExploreHub(args) => self.explore_hub(args).await?,
            Command::Pull(args) => self.pull(args, cancel).await?,
            Command::Transfer(args) => self.transfer(args, cancel).await?,
            Command::Patch(args) => self.patch(args, cancel).await?,
        };
        self.logger.detail(&format!(
            "Finished in {}",
            self.logger.format_duration(started.elapsed())
        ));
        Ok(code)
    }

    async fn explore_gitlab(&self, args: &ExploreGitlabArgs) -> Result<i32> {
        let project = args
            .repository
            .clone()
            .unwrap_or_else(|| self.config.gitlab_project.clone());
        let catalog = GitLabCatalog::new(self.config.gitlab_endpoint()?, project)?;

        if args.groups {
            self.logger.section("GitLab Groups");
            let listing = catalog.list_groups().await;
            let rows: Vec<Vec<String>> = listing
                .items
                .iter()
                .map(|g| vec![g.id.to_string(), g.name.clone()])
                .collect();
            self.logger.table(&["ID", "Name"], &rows);
            let (_, error) = listing.into_parts();
            return Ok(self.report_incomplete(error.into_iter().collect()));
        }

        self.logger
            .section(&format!("GitLab Registry: {}", catalog.project()));
        let options = DiscoveryOptions {
            packages: None,
            tag_glob: args.tag.clone(),
            with_details: args.tag.is_some(),
        };
        let discovery = discover(&catalog, &options, &self.logger).await;

        if let Some(pattern) = &args.tag {
            if discovery.tags.is_empty() {
                self.logger
                    .info(&format!("No images found with tag: {}", pattern));
            } else {
                let rows: Vec<Vec<String>> = discovery
                    .tags
                    .iter()
                    .map(|t| vec![t.package.name.clone(), t.name.clone(), t.formatted_timestamp()])
                    .collect();
                self.logger.table(&["Image Name", "Tag", "Created At"], &rows);
            }
        } else {
            self.print_tag_summary(&discovery.tags);
        }

        Ok(self.report_incomplete(discovery.errors))
    }

    async fn explore_hub(&self, args: &ExploreHubArgs) -> Result<i32> {
        let namespaces = if args.namespaces.is_empty() {
            vec![self.config.hub_namespace.clone()]
        } else {
            args.namespaces.clone()
        };
        let packages = match (&args.packages_file, args.packages.is_empty()) {
            (Some(path), _) => Some(read_list_file(path)?),
            (None, false) => Some(args.packages.clone()),
            (None, true) => None,
        };

        let endpoint = self.config.hub_endpoint()?;
        let mut catalogs: Vec<Arc<dyn RegistryCatalog>> = Vec::with_capacity(namespaces.len());
        for namespace in &namespaces {
            catalogs.push(Arc::new(HubCatalog::new(endpoint.clone(), namespace.clone())?));
        }

        let options = DiscoveryOptions {
            packages,
            tag_glob: args.details.clone(),
            with_details: false,
        };
        let discoveries =
            discover_mirrors(catalogs, options, args.max_workers, &self.logger).await;

        let mut errors = Vec::new();
        for discovery in discoveries {
            self.logger.section(&format!("Docker Hub: {}", discovery.source));
            if args.details.is_some() {
                self.print_tag_details(&discovery);
            } else {
                self.print_tag_summary(&discovery.tags);
            }
            errors.extend(discovery.errors);
        }

        Ok(self.report_incomplete(errors))
    }

    async fn pull(&self, args: &PullArgs, cancel: CancellationToken) -> Result<i32> {
        let packages = list_or_default(args.packages_file.as_ref(), DEFAULT_PACKAGES)?;
        let versions = list_or_default(args.versions_file.as_ref(), DEFAULT_VERSIONS)?;
        let namespace = args
            .namespace
            .clone()
            .unwrap_or_else(|| self.config.hub_namespace.clone());

        let mut jobs = Vec::with_capacity(packages.len() * versions.len());
        for package in &packages {
            for version in &versions {
                let reference = ImageRef::parse(&format!("{}/{}:{}", namespace, package, version))?;
                jobs.push(TransferJob::pull(reference));
            }
        }

        let dry_run = args.execution.dry_run();
        self.logger.section("Pull Images");
        self.logger.summary_kv(
            "Configuration",
            &[
                ("Mode", mode_label(dry_run)),
                ("Namespace", namespace.clone()),
                ("Packages", packages.join(", ")),
                ("Versions", versions.join(", ")),
            ],
        );

        let source_auth = if args.use_existing_auth {
            None
        } else {
            self.config.hub_auth()
        };
        let runtime = self.connect_runtime().await?;
        let engine = self.engine(
            runtime,
            EngineOptions {
                target_auth: None,
                source_auth,
                remove_old: false,
            },
        )?;

        self.run_jobs(&engine, jobs, dry_run, "pull", cancel).await
    }

    async fn transfer(&self, args: &TransferArgs, cancel: CancellationToken) -> Result<i32> {
        let dry_run = args.execution.dry_run();
        let target_repo = resolve_target_repo(args, &self.config)?;
        let runtime = self.connect_runtime().await?;

        self.logger.section("Transfer Images");
        let jobs = match (&args.image, &target_repo) {
            (Some(image), _) => {
                let reference = ImageRef::parse(image)?;
                vec![TransferJob::push(reference.clone(), reference)]
            }
            (None, None) => Vec::new(),
            (None, Some(target_repo)) => {
                let name_globs = self.filters(
                    &args.name_filters,
                    args.packages_file.as_ref(),
                    &self.config.name_filters,
                )?;
                let tag_globs = self.filters(
                    &args.tag_filters,
                    args.versions_file.as_ref(),
                    &self.config.tag_filters,
                )?;
                let source_repo = args
                    .source_repo
                    .clone()
                    .or_else(|| self.config.source_repo.clone());

                let mut items = vec![
                    ("Mode", mode_label(dry_run)),
                    ("Remove old tags", yes_no(args.remove_old)),
                    ("Source", source_repo.clone().unwrap_or_else(|| "any".to_string())),
                    ("Target", target_repo.clone()),
                    ("Name filters", name_globs.join(", ")),
                    ("Tag filters", tag_globs.join(", ")),
                ];
                let mut filter = CandidateFilter::new(&name_globs, &tag_globs, target_repo)
                    .with_source_repo(source_repo);
                if let (Some(from), Some(to)) = (&args.source_tag, &args.target_tag) {
                    filter = filter.with_tag_rewrite(from, to);
                    items.push(("Tag transformation", format!("{} -> {}", from, to)));
                }
                self.logger.summary_kv("Configuration", &items);

                let local_images = runtime.list_images().await?;
                self.logger
                    .detail(&format!("{} local images found", local_images.len()));
                filter.select(&local_images)
            }
        };

        if jobs.is_empty() {
            self.logger.info(&format!(
                "No local images match the filters (target repository: {})",
                target_repo.as_deref().unwrap_or("none")
            ));
            return Ok(0);
        }
        self.logger
            .info(&format!("{} image(s) selected for transfer", jobs.len()));

        let engine = self.engine(
            runtime,
            EngineOptions {
                target_auth: self.config.target_auth(),
                source_auth: None,
                remove_old: args.remove_old,
            },
        )?;

        self.run_jobs(&engine, jobs, dry_run, "push", cancel).await
    }

    async fn patch(&self, args: &PatchArgs, cancel: CancellationToken) -> Result<i32> {
        let dry_run = args.execution.dry_run();
        let images = read_list_file(&args.images_file)?
            .iter()
            .map(|line| ImageRef::parse(line))
            .collect::<Result<Vec<_>>>()?;
        let package_files: Vec<PathBuf> = read_list_file(&args.rpms_file)?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let install_command: Vec<String> = args
            .install_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if install_command.is_empty() {
            return Err(TransferError::Validation(
                "install command cannot be empty".to_string(),
            ));
        }

        self.logger.section("Patch Images");
        self.logger.summary_kv(
            "Configuration",
            &[
                ("Mode", mode_label(dry_run)),
                ("Images", images.len().to_string()),
                ("Package files", package_files.len().to_string()),
                ("Install command", install_command.join(" ")),
            ],
        );

        let runtime = self.connect_runtime().await?;
        let patcher = ImagePatcher::new(runtime, self.logger.clone())
            .with_install_command(install_command);

        if !dry_run {
            patcher.cleanup_leftovers().await?;
        }

        let mut patched = 0;
        let mut failed = Vec::new();
        for (index, image) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                self.logger.warning(&format!(
                    "Interrupted, {} image(s) not processed",
                    images.len() - index
                ));
                failed.push(format!("{} (not processed)", image));
                continue;
            }
            self.logger
                .subsection(&format!("[{}/{}] {}", index + 1, images.len(), image));
            match patcher.patch(image, &package_files, dry_run).await {
                Ok(_) => patched += 1,
                Err(err) => {
                    self.logger
                        .error(&format!("Failed to patch {}: {} ({})", image, err, err.hint()));
                    failed.push(format!("{}: {}", image, err));
                }
            }
        }

        if !dry_run {
            if let Err(err) = patcher.cleanup_leftovers().await {
                self.logger
                    .warning(&format!("Final container cleanup failed: {}", err));
            }
        }

        self.logger.info(&format!(
            "[{}] Patching completed. Successfully processed {}/{} images",
            mode_label(dry_run),
            patched,
            images.len()
        ));
        if !failed.is_empty() {
            self.logger.list("Failed images", &failed);
            return Ok(1);
        }
        Ok(0)
    }

    async fn connect_runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        let runtime = DockerRuntime::connect()?;
        runtime.ping().await?;
        self.logger.detail("Docker daemon is reachable");
        Ok(Arc::new(runtime))
    }

    fn engine(
        &self,
        runtime: Arc<dyn ContainerRuntime>,
        options: EngineOptions,
    ) -> Result<TransferEngine> {
        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "client setup"))?;

        let digests = ManifestDigestClient::new(client.clone(), options.target_auth.clone());
        let login = FallbackLogin::standard(client);

        Ok(TransferEngine::new(
            runtime,
            Arc::new(digests),
            Arc::new(login),
            options,
            self.logger.clone(),
        ))
    }

    async fn run_jobs(
        &self,
        engine: &TransferEngine,
        jobs: Vec<TransferJob>,
        dry_run: bool,
        transcript_prefix: &str,
        cancel: CancellationToken,
    ) -> Result<i32> {
        let mut pipeline = Pipeline::new(engine, cancel, self.logger.clone());
        match ResultRecorder::create(&self.config.log_dir, transcript_prefix) {
            Ok(recorder) => {
                self.logger
                    .detail(&format!("Transcript: {}", recorder.path().display()));
                pipeline = pipeline.with_recorder(recorder);
            }
            Err(err) => self
                .logger
                .warning(&format!("Transcript disabled, cannot create it: {}", err)),
        }

        let summary = pipeline.run(jobs, dry_run).await;
        summary.print(&self.logger);
        Ok(summary.exit_code())
    }

    /// CLI patterns win, then a list file, then the configured filters
    fn filters(
        &self,
        cli: &[String],
        file: Option<&PathBuf>,
        configured: &[String],
    ) -> Result<Vec<String>> {
        if !cli.is_empty() {
            return Ok(cli.to_vec());
        }
        if let Some(path) = file {
            let patterns = read_list_file(path)?;
            if !patterns.is_empty() {
                return Ok(patterns);
            }
        }
        Ok(configured.to_vec())
    }

    fn print_tag_summary(&self, tags: &[Tag]) {
        let mut by_package: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for tag in tags {
            by_package
                .entry(tag.package.name.as_str())
                .or_default()
                .push(tag.name.as_str());
        }
        if by_package.is_empty() {
            self.logger.info("No packages found");
            return;
        }

        let rows: Vec<Vec<String>> = by_package
            .into_iter()
            .map(|(package, mut names)| {
                names.sort_unstable_by(|a, b| b.cmp(a));
                vec![package.to_string(), names.join(", ")]
            })
            .collect();
        self.logger.table(&["Package", "Tags"], &rows);
    }

    fn print_tag_details(&self, discovery: &Discovery) {
        if discovery.tags.is_empty() {
            self.logger.info("No matching tags found");
            return;
        }
        let rows: Vec<Vec<String>> = discovery
            .tags
            .iter()
            .map(|t| {
                vec![
                    t.package.name.clone(),
                    t.name.clone(),
                    t.size_mb()
                        .map(|mb| format!("{:.2}", mb))
                        .unwrap_or_else(|| "N/A".to_string()),
                    t.digest.clone().unwrap_or_else(|| "N/A".to_string()),
                    t.formatted_timestamp(),
                ]
            })
            .collect();
        self.logger
            .table(&["Package", "Tag", "Size (MB)", "Digest", "Last Updated"], &rows);
    }

    /// Exit code for a discovery: partial listings count as failures
    fn report_incomplete(&self, errors: Vec<TransferError>) -> i32 {
        if errors.is_empty() {
            return 0;
        }
        for err in &errors {
            self.logger.error(&format!("{} ({})", err, err.hint()));
        }
        1
    }
}

fn apply_global_overrides(mut config: AppConfig, global: &GlobalArgs) -> AppConfig {
    if let Some(secs) = global.timeout.filter(|s| *s > 0) {
        config.request_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(dir) = &global.log_dir {
        config.log_dir = dir.clone();
    }
    config
}

/// `--image` pushes a reference as given, so only the filtered path needs a target
fn resolve_target_repo(args: &TransferArgs, config: &AppConfig) -> Result<Option<String>> {
    if args.image.is_some() {
        return Ok(None);
    }
    match &args.target_repo {
        Some(repo) => Ok(Some(repo.trim_end_matches('/').to_string())),
        None => config.target_repository().map(Some),
    }
}

fn list_or_default(path: Option<&PathBuf>, defaults: &[&str]) -> Result<Vec<String>> {
    match path {
        Some(path) => {
            let items = read_list_file(path)?;
            if items.is_empty() {
                return Err(TransferError::Validation(format!(
                    "{} contains no entries",
                    path.display()
                )));
            }
            Ok(items)
        }
        None => Ok(defaults.iter().map(|s| s.to_string()).collect()),
    }
}

fn mode_label(dry_run: bool) -> String {
    let label = if dry_run { "DRY RUN" } else { "EXECUTE" };
    label.to_string()
}

fn yes_no(value: bool) -> String {
    let label = if value { "Yes" } else { "No" };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "registry-transfer",
            "--timeout",
            "42",
            "--log-dir",
            "/var/log/transfer",
            "explore-hub",
        ])
        .unwrap();
        let config = apply_global_overrides(AppConfig::default(), &cli.global);
        assert_eq!(config.request_timeout.as_secs(), 42);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/transfer"));
    }

    #[test]
    fn test_zero_timeout_is_ignored() {
        let cli = Cli::try_parse_from(["registry-transfer", "--timeout", "0", "explore-hub"]).unwrap();
        let config = apply_global_overrides(AppConfig::default(), &cli.global);
        assert_eq!(config.request_timeout, AppConfig::default().request_timeout);
    }

    fn transfer_args(argv: &[&str]) -> TransferArgs {
        let mut full = vec!["registry-transfer", "transfer"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Transfer(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_single_image_needs_no_target_repo() {
        let config = AppConfig::default();
        let args = transfer_args(&["--image", "registry.example.com/idol/content:24.4"]);
        assert_eq!(resolve_target_repo(&args, &config).unwrap(), None);
    }

    #[test]
    fn test_filtered_transfer_needs_target_repo() {
        let config = AppConfig::default();
        assert!(resolve_target_repo(&transfer_args(&[]), &config).is_err());

        let args = transfer_args(&["--target-repo", "registry.example.com/search/idol/"]);
        assert_eq!(
            resolve_target_repo(&args, &config).unwrap().as_deref(),
            Some("registry.example.com/search/idol")
        );
    }

    #[test]
    fn test_list_or_default() {
        let defaults = list_or_default(None, DEFAULT_VERSIONS).unwrap();
        assert_eq!(defaults, vec!["24.4"]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.txt");
        std::fs::write(&path, "# versions\n24.4\n\n25.1\n").unwrap();
        assert_eq!(list_or_default(Some(&path), DEFAULT_VERSIONS).unwrap(), vec!["24.4", "25.1"]);

        std::fs::write(&path, "# nothing\n").unwrap();
        assert!(list_or_default(Some(&path), DEFAULT_VERSIONS).is_err());
    }
}
