use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dungeon-blocks",
    about = "Turns a block workspace snapshot into hero code, and runs it locally or on a dungeon backend."
)]
pub struct Args {
    #[arg(value_name = "INPUT", help = "Workspace snapshot (.json or .xml).")]
    pub input: PathBuf,

    #[arg(value_name = "OUTPUT", help = "Write the generated code here instead of stdout.")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Emit one fragment per statement block of the start chain, plus one per function definition, instead of a whole program.")]
    pub per_block: bool,

    #[arg(long, help = "Do not emit highlightBlock(...) hooks.")]
    pub no_hooks: bool,

    #[arg(long, help = "Fold variables whose value is known at generation time.")]
    pub value_cache: bool,

    #[arg(long, help = "Fail on empty sockets instead of emitting placeholders.")]
    pub strict: bool,

    #[arg(long, conflicts_with_all = ["step_local", "remote"], help = "Run the program in the local interpreter.")]
    pub run_local: bool,

    #[arg(long, value_name = "N", conflicts_with = "remote", help = "Take N single-block steps in the local interpreter.")]
    pub step_local: Option<usize>,

    #[arg(
        long,
        value_name = "URL",
        num_args = 0..=1,
        help = "Run the program on the backend at URL, or at the configured backend_url when URL is omitted."
    )]
    pub remote: Option<Option<String>>,

    #[arg(long, value_name = "NAME", requires = "remote", help = "Load this level on the backend first.")]
    pub level: Option<String>,

    #[arg(long, value_name = "FILE", help = "TOML configuration file.")]
    pub config: Option<PathBuf>,

    #[arg(long = "disable", value_name = "TYPE", help = "Treat this block type as unavailable. Repeatable.")]
    pub disabled_types: Vec<String>,
}
