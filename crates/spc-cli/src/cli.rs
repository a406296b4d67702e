use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const SPC_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const SPC_BEFORE_HELP: &str = concat!(
    "spc ",
    env!("CARGO_PKG_VERSION"),
    " – revision-controlled submission storage\n\n",
    "\x1b[1;36mWrite\x1b[0m\n",
    "  store            Commit a snippet or ZIP package as a new revision.\n",
    "  revert           Force a repository back to a stored revision.\n\n",
    "\x1b[1;36mRead\x1b[0m\n",
    "  checkout         Leave a repository's working tree at a revision.\n",
    "  ls               List files now, or as they were at a revision.\n",
    "  tree             Print the nested file tree of a repository.\n",
    "  export           Write a ZIP of a revision for download.\n",
    "  settings         Show the resolved storage settings.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "spc",
    author,
    version,
    disable_help_subcommand = true,
    before_help = SPC_BEFORE_HELP,
    help_template = SPC_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct SpcCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "TOML settings file (overrides SPC_CONFIG)",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "Storage root (overrides SPC_STORAGE_DIR)",
        global = true
    )]
    pub storage_dir: Option<PathBuf>,
    #[arg(
        long,
        help = "Version control backend: hg or git (overrides SPC_VCS_BACKEND)",
        global = true
    )]
    pub backend: Option<String>,
    #[command(subcommand)]
    pub command: SpcCommand,
}

#[derive(Subcommand, Debug)]
pub enum SpcCommand {
    #[command(subcommand, about = "Commit a snippet or ZIP package as a new revision.")]
    Store(StoreCommand),
    #[command(about = "Force a repository back to a stored revision, dropping untracked files.")]
    Revert(RevertArgs),
    #[command(about = "Leave a repository's working tree at a revision.")]
    Checkout(RevisionArgs),
    #[command(about = "List files now, or as they were at --hash.")]
    Ls(ListArgs),
    #[command(about = "Print the nested file tree of a repository.")]
    Tree(RepoArgs),
    #[command(about = "Write a ZIP of a revision for download.")]
    Export(ExportArgs),
    #[command(about = "Show the resolved storage settings.")]
    Settings,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    #[command(about = "Store a code snippet read from a file.")]
    Snippet(SnippetArgs),
    #[command(about = "Store the contents of a ZIP package.")]
    Package(PackageArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, help = "Revision primary key (names new repositories)")]
    pub revision_id: u64,
    #[arg(long, default_value_t = 1, help = "Submission primary key")]
    pub submission_id: u64,
    #[arg(long, help = "Revision title")]
    pub title: String,
    #[arg(long, default_value = "", help = "Revision description")]
    pub description: String,
    #[arg(long, default_value = "cc0", help = "License slug (cc0 or bsd)")]
    pub license: String,
    #[arg(long, default_value_t = 1, help = "Id of the submitting user")]
    pub user_id: u64,
    #[arg(long, default_value = "anonymous", help = "Name of the submitting user")]
    pub username: String,
    #[arg(
        long,
        help = "Existing repository path under the storage root; stores an edit"
    )]
    pub repo: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SnippetArgs {
    #[command(flatten)]
    pub common: StoreArgs,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "File holding the snippet code")]
    pub code_file: PathBuf,
}

#[derive(Args, Debug)]
pub struct PackageArgs {
    #[command(flatten)]
    pub common: StoreArgs,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Uploaded ZIP file")]
    pub zip: PathBuf,
}

#[derive(Args, Debug)]
pub struct RepoArgs {
    #[arg(long, help = "Repository path under the storage root")]
    pub repo: PathBuf,
}

#[derive(Args, Debug)]
pub struct RevisionArgs {
    #[command(flatten)]
    pub target: RepoArgs,
    #[arg(long, help = "Revision hash")]
    pub hash: String,
}

#[derive(Args, Debug)]
pub struct RevertArgs {
    #[command(flatten)]
    pub target: RepoArgs,
    #[arg(long, help = "Stored revision hash to go back to")]
    pub hash: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub target: RepoArgs,
    #[arg(long, help = "List the files of this revision instead of the working tree")]
    pub hash: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub revision: RevisionArgs,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Destination ZIP file")]
    pub out: PathBuf,
}
