//! Command-line argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registry-transfer")]
#[command(about = "Discover container images across registries and transfer them to a target registry")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,

    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        help = "Timeout in seconds for registry API requests [env: REQUEST_TIMEOUT]"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "log-dir",
        global = true,
        help = "Directory for run transcripts [env: TRANSFER_LOG_DIR]"
    )]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List packages and tags of the GitLab project container registry
    ExploreGitlab(ExploreGitlabArgs),
    /// List repositories and tags of Docker Hub namespaces
    ExploreHub(ExploreHubArgs),
    /// Pull images from a Docker Hub namespace into the local runtime
    Pull(PullArgs),
    /// Retag matching local images for the target repository and push them
    Transfer(TransferArgs),
    /// Install package files into local images, committing `<tag>_fix` images
    Patch(PatchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExecutionArgs {
    #[arg(
        long = "execute",
        alias = "no-dry-run",
        help = "Perform the operation (default is a dry run)"
    )]
    pub execute: bool,
}

impl ExecutionArgs {
    pub fn dry_run(&self) -> bool {
        !self.execute
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExploreGitlabArgs {
    #[arg(
        long = "repository",
        help = "Project path to explore, e.g. group/project [env: GITLAB_PROJECT]"
    )]
    pub repository: Option<String>,

    #[arg(long = "tag", help = "Show per-tag details for tags matching this pattern")]
    pub tag: Option<String>,

    #[arg(long = "groups", help = "List the groups visible to the token instead")]
    pub groups: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExploreHubArgs {
    #[arg(
        long = "namespace",
        help = "Namespace to explore; repeat to explore several mirrors concurrently [env: DOCKER_HUB_NAMESPACE]"
    )]
    pub namespaces: Vec<String>,

    #[arg(long = "packages", num_args = 1.., help = "Only show these packages")]
    pub packages: Vec<String>,

    #[arg(
        long = "packages-file",
        conflicts_with = "packages",
        help = "File with package names, one per line"
    )]
    pub packages_file: Option<PathBuf>,

    #[arg(
        long = "details",
        help = "Show size, digest and update time for tags matching this pattern (supports wildcards)"
    )]
    pub details: Option<String>,

    #[arg(
        long = "max-workers",
        default_value = "4",
        help = "Maximum number of namespaces explored at once"
    )]
    pub max_workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct PullArgs {
    #[arg(long = "packages-file", help = "File with package names, one per line")]
    pub packages_file: Option<PathBuf>,

    #[arg(long = "versions-file", help = "File with versions, one per line")]
    pub versions_file: Option<PathBuf>,

    #[arg(long = "namespace", help = "Namespace to pull from [env: DOCKER_HUB_NAMESPACE]")]
    pub namespace: Option<String>,

    #[arg(
        long = "use-existing-auth",
        help = "Rely on the runtime's stored credentials instead of DOCKER_HUB_USERNAME/PASSWORD"
    )]
    pub use_existing_auth: bool,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    #[arg(long = "source-repo", help = "Only consider local images under this repository [env: OLD_REPO]")]
    pub source_repo: Option<String>,

    #[arg(
        long = "target-repo",
        alias = "repository",
        help = "Repository the images are pushed to [env: NEW_REPO]"
    )]
    pub target_repo: Option<String>,

    #[arg(
        long = "name-filter",
        alias = "package",
        help = "Image name pattern; repeat for several [env: NAME_FILTERS]"
    )]
    pub name_filters: Vec<String>,

    #[arg(long = "tag-filter", help = "Tag pattern; repeat for several [env: TAG_FILTERS]")]
    pub tag_filters: Vec<String>,

    #[arg(long = "packages-file", help = "File with image name patterns, one per line")]
    pub packages_file: Option<PathBuf>,

    #[arg(long = "versions-file", help = "File with tag patterns, one per line")]
    pub versions_file: Option<PathBuf>,

    #[arg(long = "source-tag", requires = "target_tag", help = "Only transfer this tag")]
    pub source_tag: Option<String>,

    #[arg(long = "target-tag", requires = "source_tag", help = "Tag the transferred images get")]
    pub target_tag: Option<String>,

    #[arg(
        long = "image",
        conflicts_with_all = ["source_repo", "name_filters", "packages_file"],
        help = "Push a single local image:tag as is"
    )]
    pub image: Option<String>,

    #[arg(long = "remove-old", help = "Remove the original tag after a successful push")]
    pub remove_old: bool,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct PatchArgs {
    #[arg(long = "images-file", help = "File with image:tag references to patch, one per line")]
    pub images_file: PathBuf,

    #[arg(
        long = "rpms-file",
        alias = "packages-file",
        help = "File with package file paths to install, one per line"
    )]
    pub rpms_file: PathBuf,

    #[arg(
        long = "install-command",
        default_value = "rpm -Uvh",
        help = "Command run for each package file inside the container"
    )]
    pub install_command: String,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}
