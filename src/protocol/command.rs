//! Command table and dispatch

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;

use super::tokenizer::tokenize;
use super::{Pairs, Reply};
use crate::db::{Database, EntityInfo, Entry, Mutation, TaggedEntry};
use crate::error::{Error, Result};
use crate::types::{EntityKind, Permission};

/// What a command does once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Password,
    List,
    ListInfo,
    ListTags,
    Count,
    CountAbsolute,
    Love,
    Hate,
    Kill,
    Unkill,
    Rate,
    RateAbsolute,
    Karma,
    AddTag,
    RemoveTag,
}

/// One row of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub permission: Permission,
    /// Minimum argument count, `None` for unchecked
    pub min: Option<usize>,
    /// Maximum argument count, `None` for unbounded
    pub max: Option<usize>,
    pub action: Action,
    pub kind: EntityKind,
}

macro_rules! cmd {
    ($name:literal, $perm:ident, $args:literal, $action:ident) => {
        cmd!($name, $perm, $args, $action, Song)
    };
    ($name:literal, $perm:ident, $args:literal, $action:ident, $kind:ident) => {
        CommandSpec {
            name: $name,
            permission: Permission::$perm,
            min: Some($args),
            max: Some($args),
            action: Action::$action,
            kind: EntityKind::$kind,
        }
    };
}

/// All commands, sorted by name for binary search.
pub static COMMANDS: &[CommandSpec] = &[
    cmd!("addtag", UPDATE, 2, AddTag),
    cmd!("addtag_album", UPDATE, 2, AddTag, Album),
    cmd!("addtag_artist", UPDATE, 2, AddTag, Artist),
    cmd!("addtag_genre", UPDATE, 2, AddTag, Genre),
    cmd!("count", UPDATE, 2, Count),
    cmd!("count_absolute", UPDATE, 2, CountAbsolute),
    cmd!("count_absolute_album", UPDATE, 2, CountAbsolute, Album),
    cmd!("count_absolute_artist", UPDATE, 2, CountAbsolute, Artist),
    cmd!("count_absolute_genre", UPDATE, 2, CountAbsolute, Genre),
    cmd!("count_album", UPDATE, 2, Count, Album),
    cmd!("count_artist", UPDATE, 2, Count, Artist),
    cmd!("count_genre", UPDATE, 2, Count, Genre),
    cmd!("hate", UPDATE, 1, Hate),
    cmd!("hate_album", UPDATE, 1, Hate, Album),
    cmd!("hate_artist", UPDATE, 1, Hate, Artist),
    cmd!("hate_genre", UPDATE, 1, Hate, Genre),
    cmd!("karma", UPDATE, 2, Karma),
    cmd!("kill", UPDATE, 1, Kill),
    cmd!("kill_album", UPDATE, 1, Kill, Album),
    cmd!("kill_artist", UPDATE, 1, Kill, Artist),
    cmd!("kill_genre", UPDATE, 1, Kill, Genre),
    cmd!("list", SELECT, 1, List),
    cmd!("list_album", SELECT, 1, List, Album),
    cmd!("list_artist", SELECT, 1, List, Artist),
    cmd!("list_genre", SELECT, 1, List, Genre),
    cmd!("listinfo", SELECT, 1, ListInfo),
    cmd!("listinfo_album", SELECT, 1, ListInfo, Album),
    cmd!("listinfo_artist", SELECT, 1, ListInfo, Artist),
    cmd!("listinfo_genre", SELECT, 1, ListInfo, Genre),
    cmd!("listtags", SELECT, 1, ListTags),
    cmd!("listtags_album", SELECT, 1, ListTags, Album),
    cmd!("listtags_artist", SELECT, 1, ListTags, Artist),
    cmd!("listtags_genre", SELECT, 1, ListTags, Genre),
    cmd!("love", UPDATE, 1, Love),
    cmd!("love_album", UPDATE, 1, Love, Album),
    cmd!("love_artist", UPDATE, 1, Love, Artist),
    cmd!("love_genre", UPDATE, 1, Love, Genre),
    cmd!("password", NONE, 1, Password),
    cmd!("rate", UPDATE, 2, Rate),
    cmd!("rate_absolute", UPDATE, 2, RateAbsolute),
    cmd!("rate_absolute_album", UPDATE, 2, RateAbsolute, Album),
    cmd!("rate_absolute_artist", UPDATE, 2, RateAbsolute, Artist),
    cmd!("rate_absolute_genre", UPDATE, 2, RateAbsolute, Genre),
    cmd!("rate_album", UPDATE, 2, Rate, Album),
    cmd!("rate_artist", UPDATE, 2, Rate, Artist),
    cmd!("rate_genre", UPDATE, 2, Rate, Genre),
    cmd!("rmtag", UPDATE, 2, RemoveTag),
    cmd!("rmtag_album", UPDATE, 2, RemoveTag, Album),
    cmd!("rmtag_artist", UPDATE, 2, RemoveTag, Artist),
    cmd!("rmtag_genre", UPDATE, 2, RemoveTag, Genre),
    cmd!("unkill", UPDATE, 1, Unkill),
    cmd!("unkill_album", UPDATE, 1, Unkill, Album),
    cmd!("unkill_artist", UPDATE, 1, Unkill, Artist),
    cmd!("unkill_genre", UPDATE, 1, Unkill, Genre),
];

/// Find a command by exact name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .binary_search_by(|spec| spec.name.cmp(name))
        .ok()
        .map(|i| &COMMANDS[i])
}

impl CommandSpec {
    fn check_permission(&self, held: Permission) -> Result<()> {
        if held.contains(self.permission) {
            Ok(())
        } else {
            Err(Error::Permission(format!(
                "you don't have permission for \"{}\"",
                self.name
            )))
        }
    }

    fn check_args(&self, count: usize) -> Result<()> {
        let fail = |what: &str| Err(Error::argument(format!("{what} for \"{}\"", self.name)));
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max && count != min => {
                fail("wrong number of arguments")
            }
            (Some(min), _) if count < min => fail("too few arguments"),
            (_, Some(max)) if count > max => fail("too many arguments"),
            _ => Ok(()),
        }
    }
}

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub permission: Permission,
}

/// Validates requests against the command table and runs them.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    passwords: Arc<HashMap<String, Permission>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(db: Database, passwords: HashMap<String, Permission>) -> Self {
        Self {
            db,
            passwords: Arc::new(passwords),
        }
    }

    /// Handle one request line and produce its reply.
    ///
    /// Validation runs in order: lookup, permission, argument count.
    pub async fn dispatch(&self, session: &mut Session, line: &str) -> Reply {
        let request = match tokenize(line) {
            Ok(request) => request,
            Err(e) => return Reply::ack(&e.command, &e.error),
        };

        let result = match lookup(&request.command) {
            None => Err(Error::UnknownCommand(request.command.clone())),
            Some(spec) => match spec
                .check_permission(session.permission)
                .and_then(|()| spec.check_args(request.args.len()))
            {
                Ok(()) => self.run(spec, session, &request.args).await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(pairs) => Reply::Ok(pairs),
            Err(e) => Reply::ack(&request.command, &e),
        }
    }

    async fn run(&self, spec: &CommandSpec, session: &mut Session, args: &[String]) -> Result<Pairs> {
        let kind = spec.kind;
        let permission = session.permission;
        let expr = args.first().map_or("", String::as_str);

        let mutation = match spec.action {
            Action::Password => {
                session.permission = *self.passwords.get(expr).ok_or(Error::Password)?;
                return Ok(Pairs::new());
            }
            Action::List => {
                let entries = self.db.list(permission, kind, expr).await?;
                return Ok(entries.iter().flat_map(|e| entry_pairs(kind, e)).collect());
            }
            Action::ListInfo => {
                let infos = self.db.list_info(permission, kind, expr).await?;
                return Ok(infos.iter().flat_map(|i| info_pairs(kind, i)).collect());
            }
            Action::ListTags => {
                let tagged = self.db.list_tags(permission, kind, expr).await?;
                return Ok(tagged.iter().flat_map(|t| tag_pairs(kind, t)).collect());
            }
            Action::RemoveTag => {
                let changes = self.db.remove_tag(permission, kind, expr, &args[1]).await?;
                return Ok(changes_pairs(changes));
            }
            Action::Count => Mutation::Count(number(&args[1])?),
            Action::CountAbsolute => Mutation::CountAbsolute(number(&args[1])?),
            Action::Love => Mutation::Love(true),
            Action::Hate => Mutation::Love(false),
            Action::Kill => Mutation::Kill(true),
            Action::Unkill => Mutation::Kill(false),
            Action::Rate => Mutation::Rate(number(&args[1])?),
            Action::RateAbsolute => Mutation::RateAbsolute(number(&args[1])?),
            Action::Karma => Mutation::Karma(number(&args[1])?),
            Action::AddTag => Mutation::AddTag(args[1].clone()),
        };

        let changes = self.db.mutate(permission, kind, expr, mutation).await?;
        Ok(changes_pairs(changes))
    }
}

fn number(arg: &str) -> Result<i64> {
    arg.parse()
        .map_err(|_| Error::argument(format!("Integer expected: {arg}")))
}

fn pair(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn entry_pairs(kind: EntityKind, entry: &Entry) -> Pairs {
    let mut pairs = vec![pair("id", entry.id), pair(kind.identity_key(), &entry.name)];
    if let Some(artist) = &entry.artist {
        pairs.push(pair("Artist", artist));
    }
    pairs
}

fn info_pairs(kind: EntityKind, info: &EntityInfo) -> Pairs {
    let mut pairs = entry_pairs(kind, &info.entry);
    pairs.push(pair("Play Count", info.play_count));
    pairs.push(pair("Love", info.love));
    pairs.push(pair("Kill", info.kill));
    pairs.push(pair("Rating", info.rating));
    if let Some(karma) = info.karma {
        pairs.push(pair("Karma", karma));
    }
    if let Some(played) = info.last_played.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
        pairs.push(pair("Last Played", played.to_rfc3339()));
    }
    pairs
}

fn tag_pairs(kind: EntityKind, tagged: &TaggedEntry) -> Pairs {
    let mut pairs = entry_pairs(kind, &tagged.entry);
    pairs.extend(tagged.tags.iter().map(|t| pair("Tag", t)));
    pairs
}

fn changes_pairs(changes: usize) -> Pairs {
    vec![pair("changes", changes)]
}
