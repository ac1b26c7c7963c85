//! mpd-stats-client
//!
//! Command-line client for the stats server. Commands that take an
//! expression default to the song MPD is currently playing.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use mpd_stats::client::{group_entries, identity_expression, StatsClient};
use mpd_stats::mpd::MpdClient;
use mpd_stats::protocol::Pairs;
use mpd_stats::types::EntityKind;
use mpd_stats::Config;

#[derive(Parser)]
#[command(name = "mpd-stats-client")]
#[command(author, version, about = "Query and edit MPD listening statistics")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Stats server host or unix socket path
    #[arg(long, env = "MPD_STATS_HOST", default_value = "localhost")]
    host: String,

    /// Stats server port
    #[arg(long, env = "MPD_STATS_PORT", default_value_t = mpd_stats::DEFAULT_PORT)]
    port: u16,

    /// Password sent before the command
    #[arg(long, env = "MPD_STATS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Configuration file, read for the MPD connection
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct Target {
    /// Table to operate on: song, artist, album or genre
    #[arg(short, long, default_value = "song")]
    kind: EntityKind,

    /// Filter expression; defaults to the current song
    expr: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List matching ids and names
    List(Target),
    /// Show counters of matching rows
    Listinfo(Target),
    /// Show tags of matching rows
    Listtags(Target),
    Love(Target),
    Hate(Target),
    Kill(Target),
    Unkill(Target),
    /// Add to the play count
    Count {
        #[arg(allow_negative_numbers = true)]
        count: i64,
        #[command(flatten)]
        target: Target,
    },
    /// Set the play count
    CountAbsolute {
        #[arg(allow_negative_numbers = true)]
        count: i64,
        #[command(flatten)]
        target: Target,
    },
    /// Add to the rating
    Rate {
        #[arg(allow_negative_numbers = true)]
        rating: i64,
        #[command(flatten)]
        target: Target,
    },
    /// Set the rating
    RateAbsolute {
        #[arg(allow_negative_numbers = true)]
        rating: i64,
        #[command(flatten)]
        target: Target,
    },
    /// Set song karma (0-100)
    Karma {
        karma: i64,
        /// Filter expression; defaults to the current song
        expr: Option<String>,
    },
    Addtag {
        tag: String,
        #[command(flatten)]
        target: Target,
    },
    Rmtag {
        tag: String,
        #[command(flatten)]
        target: Target,
    },
}

impl Command {
    /// Protocol command base name, target and extra argument.
    fn request(&self) -> (&'static str, Option<&Target>, Option<String>) {
        match self {
            Self::List(t) => ("list", Some(t), None),
            Self::Listinfo(t) => ("listinfo", Some(t), None),
            Self::Listtags(t) => ("listtags", Some(t), None),
            Self::Love(t) => ("love", Some(t), None),
            Self::Hate(t) => ("hate", Some(t), None),
            Self::Kill(t) => ("kill", Some(t), None),
            Self::Unkill(t) => ("unkill", Some(t), None),
            Self::Count { count, target } => ("count", Some(target), Some(count.to_string())),
            Self::CountAbsolute { count, target } => {
                ("count_absolute", Some(target), Some(count.to_string()))
            }
            Self::Rate { rating, target } => ("rate", Some(target), Some(rating.to_string())),
            Self::RateAbsolute { rating, target } => {
                ("rate_absolute", Some(target), Some(rating.to_string()))
            }
            Self::Karma { karma, .. } => ("karma", None, Some(karma.to_string())),
            Self::Addtag { tag, target } => ("addtag", Some(target), Some(tag.clone())),
            Self::Rmtag { tag, target } => ("rmtag", Some(target), Some(tag.clone())),
        }
    }

    const fn is_listing(&self) -> bool {
        matches!(self, Self::List(_) | Self::Listinfo(_) | Self::Listtags(_))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (base, target, extra) = cli.command.request();
    let (kind, expr) = match (&cli.command, target) {
        (Command::Karma { expr, .. }, _) => (EntityKind::Song, expr.clone()),
        (_, Some(target)) => (target.kind, target.expr.clone()),
        (_, None) => (EntityKind::Song, None),
    };
    let expr = match expr {
        Some(expr) => expr,
        None => current_expression(&cli, kind).await?,
    };
    let name = format!("{base}{}", kind.suffix());

    let mut args = vec![expr.as_str()];
    args.extend(extra.as_deref());

    let mut client = StatsClient::connect(&cli.host, cli.port)
        .await
        .with_context(|| format!("failed to connect to stats server at {}:{}", cli.host, cli.port))?;
    if let Some(password) = &cli.password {
        client.password(password).await?;
    }

    if cli.command.is_listing() {
        let groups = group_entries(client.command(&name, &args).await?);
        print_groups(groups, cli.json);
    } else {
        let changes = client.changes(&name, &args).await?;
        if cli.json {
            println!("{}", json!({ "changes": changes }));
        } else {
            println!("changes: {changes}");
        }
    }
    Ok(())
}

/// Identity expression for the song MPD is playing.
async fn current_expression(cli: &Cli, kind: EntityKind) -> anyhow::Result<String> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let mut mpd = MpdClient::connect(&config.mpd).await.with_context(|| {
        format!(
            "no expression given and MPD at {}:{} is unreachable",
            config.mpd.host, config.mpd.port
        )
    })?;

    let Some(song) = mpd.current_song().await? else {
        bail!("no expression given and MPD is not playing anything");
    };
    identity_expression(kind, &song)
        .with_context(|| format!("current song `{}' has no {kind} tag", song.uri))
}

fn print_groups(groups: Vec<Pairs>, as_json: bool) {
    if as_json {
        let rows: Vec<Value> = groups.into_iter().map(group_to_json).collect();
        println!("{}", Value::Array(rows));
        return;
    }
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for (key, value) in group {
            println!("{key}: {value}");
        }
    }
}

/// Repeated `Tag` lines become one array.
fn group_to_json(group: Pairs) -> Value {
    let mut map = Map::new();
    let mut tags = Vec::new();
    for (key, value) in group {
        if key == "Tag" {
            tags.push(Value::String(value));
        } else {
            map.insert(key, Value::String(value));
        }
    }
    if !tags.is_empty() {
        map.insert("Tag".to_string(), Value::Array(tags));
    }
    Value::Object(map)
}
