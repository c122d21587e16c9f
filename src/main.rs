use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use rusty_dblp::data::export;
use rusty_dblp::data::parser::{self, Validation};
use rusty_dblp::{DatasetLoader, DatasetSummary, Record, ResourceLocator};

#[derive(Parser, Debug)]
#[command(name = "rusty-dblp")]
#[command(about = "Load XML record databases and their DTD from bundled resources")]
#[command(version)]
struct Cli {
    /// Resource root to search, in order (repeatable). Defaults to
    /// $RUSTY_DBLP_RESOURCES, then the `resources` directory next to the executable.
    #[arg(short = 'r', long = "resources", global = true)]
    resources: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ResourcePair {
    /// Resource name of the XML document
    xml: String,
    /// Resource name of its DTD
    dtd: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a database and print record counts
    Summary {
        #[command(flatten)]
        pair: ResourcePair,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a database strictly against its DTD
    Validate {
        #[command(flatten)]
        pair: ResourcePair,
    },

    /// Print the record with the given key as JSON
    Show {
        #[command(flatten)]
        pair: ResourcePair,

        key: String,
    },

    /// Write records to stdout
    Dump {
        #[command(flatten)]
        pair: ResourcePair,

        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Only records of this kind (element name)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Csv,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let locator = if cli.resources.is_empty() {
        ResourceLocator::from_env()
    } else {
        ResourceLocator::new(cli.resources)
    };
    let loader = DatasetLoader::new(locator);

    match cli.command {
        Command::Summary { pair, json } => {
            let summary = loader.load(&pair.xml, &pair.dtd)?.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }

        Command::Validate { pair } => {
            let xml = loader.locator().resolve(&(&pair.xml).into())?;
            let dtd = loader.locator().resolve(&(&pair.dtd).into())?;
            let dataset = parser::parse(&xml, &dtd, Validation::Strict)
                .with_context(|| format!("`{}` does not validate against `{}`", pair.xml, pair.dtd))?;
            println!("{}: valid ({} records)", pair.xml, dataset.len());
        }

        Command::Show { pair, key } => {
            let dataset = loader.load(&pair.xml, &pair.dtd)?;
            let Some(record) = dataset.get(&key) else {
                bail!("no record with key `{key}` in `{}`", pair.xml);
            };
            println!("{}", serde_json::to_string_pretty(record)?);
        }

        Command::Dump { pair, format, kind } => {
            let dataset = loader.load(&pair.xml, &pair.dtd)?;
            let records: Vec<&Record> = match kind.as_deref() {
                Some(kind) => dataset.of_kind(kind).collect(),
                None => dataset.iter().collect(),
            };

            let mut stdout = io::stdout().lock();
            match format {
                Format::Json => {
                    export::write_json(records, &mut stdout)?;
                    writeln!(stdout)?;
                }
                Format::Csv => export::write_csv(&dataset, records, &mut stdout)?,
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &DatasetSummary) {
    println!("root:    <{}>", summary.root);
    println!("records: {}", summary.records);
    for (kind, count) in &summary.kinds {
        println!("  {kind:<16} {count}");
    }
    println!("fields:  {}", summary.fields.join(", "));
    if !summary.undeclared.is_empty() {
        println!("undeclared (kept): {}", summary.undeclared.join(", "));
    }
}
