//! Subcommands and their dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::auth::{self, AUTH_NAMESPACE};
use crate::cache::{CacheResult, QueryKey};
use crate::gateway::cache::{GatewayQueryKey, DATA_NAMESPACES};
use crate::gateway::types::{GallerySaveRequest, GalleryUpdateRequest, Person, Weapon};
use crate::proxy;
use crate::services::{DamageService, GalleryService, PeopleService, SyncService, WeaponService};
use crate::session::Session;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Characters
  #[command(subcommand)]
  People(PeopleCommand),

  /// Weapons
  #[command(subcommand)]
  Weapons(WeaponCommand),

  /// Gallery images
  #[command(subcommand)]
  Gallery(GalleryCommand),

  /// Damage for one or more characters
  Damage {
    #[arg(required = true)]
    names: Vec<String>,

    /// Ignore cached values
    #[arg(long)]
    refresh: bool,
  },

  /// Local cache maintenance
  #[command(subcommand)]
  Cache(CacheCommand),

  /// Tokens and SSO
  #[command(subcommand)]
  Auth(AuthCommand),

  /// Run the proxy routes
  Serve,
}

#[derive(Subcommand, Debug)]
pub enum PeopleCommand {
  /// List character names
  Names,
  /// List characters
  List {
    #[arg(long)]
    refresh: bool,
  },
  /// Fetch one character
  Get {
    name: String,
    /// Look the character up in the cached list instead
    #[arg(long)]
    cached: bool,
  },
  /// Insert a character from a JSON object
  Insert { json: String },
  /// Update a character from a JSON object
  Update { json: String },
  /// Insert every character in a JSON array file
  Import { file: PathBuf },
  /// Delete every character
  DeleteAll,
  /// Send the character list to the spreadsheet sync endpoint
  Sync {
    /// Fetch a fresh list instead of the cached one
    #[arg(long)]
    refresh: bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum WeaponCommand {
  List,
  Get { name: String },
  /// Weapons held by a character
  Owner { owner: String },
  /// Save a weapon from a JSON object
  Save { json: String },
  Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum GalleryCommand {
  List,
  Get { id: i64 },
  Save {
    /// Base64-encoded image
    image_base64: String,
  },
  Update {
    id: i64,
    #[arg(long)]
    image_base64: Option<String>,
  },
  Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Clear one namespace, or all cached gateway data
  Clear { namespace: Option<String> },
  /// Entry counts and list expiry
  Status,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
  /// Check the stored token with the backend
  Verify,
  /// Revoke the session and clear local data
  Logout,
  /// Print the SSO login URL
  LoginUrl,
  /// Store tokens obtained elsewhere
  SetToken {
    token: String,
    #[arg(long)]
    refresh_token: Option<String>,
  },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value)
    .map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}

fn print_cached<T: Serialize>(result: &CacheResult<T>) -> Result<()> {
  print_json(&json!({
    "source": result.source,
    "cachedAt": result.cached_at,
    "data": result.data,
  }))
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, input: &str) -> Result<T> {
  serde_json::from_str(input).map_err(|e| eyre!("Invalid {} JSON: {}", what, e))
}

pub async fn run(command: Command, session: Session) -> Result<()> {
  match command {
    Command::People(cmd) => run_people(cmd, &session).await,
    Command::Weapons(cmd) => run_weapons(cmd, &session).await,
    Command::Gallery(cmd) => run_gallery(cmd, &session).await,
    Command::Damage { names, refresh } => run_damage(&names, refresh, &session).await,
    Command::Cache(cmd) => run_cache(cmd, &session),
    Command::Auth(cmd) => run_auth(cmd, &session).await,
    Command::Serve => proxy::serve(Arc::new(session)).await,
  }
}

async fn run_people(cmd: PeopleCommand, session: &Session) -> Result<()> {
  let people = PeopleService::new(session);
  match cmd {
    PeopleCommand::Names => print_cached(&people.names().await?),
    PeopleCommand::List { refresh: true } => print_cached(&people.refresh().await?),
    PeopleCommand::List { refresh: false } => print_cached(&people.list().await?),
    PeopleCommand::Get { name, cached: true } => match people.find(&name).await? {
      Some(person) => print_json(&person),
      None => Err(eyre!("Character not found: {}", name)),
    },
    PeopleCommand::Get { name, cached: false } => print_json(&people.get_by_name(&name).await?),
    PeopleCommand::Insert { json } => {
      let person: Person = parse_json("person", &json)?;
      print_json(&people.insert(&person).await?)
    }
    PeopleCommand::Update { json } => {
      let person: Person = parse_json("person", &json)?;
      print_json(&people.update(&person).await?)
    }
    PeopleCommand::Import { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let list: Vec<Person> = parse_json("people", &contents)?;
      print_json(&people.insert_many(&list).await?)
    }
    PeopleCommand::DeleteAll => print_json(&people.delete_all().await?),
    PeopleCommand::Sync { refresh } => {
      let list = if refresh {
        people.refresh().await?
      } else {
        people.list().await?
      };
      let characters = list
        .data
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| eyre!("Failed to serialize characters: {}", e))?;
      print_json(&SyncService::new(session).push(characters).await?)
    }
  }
}

async fn run_weapons(cmd: WeaponCommand, session: &Session) -> Result<()> {
  let weapons = WeaponService::new(session);
  match cmd {
    WeaponCommand::List => print_cached(&weapons.list().await?),
    WeaponCommand::Get { name } => print_json(&weapons.get(&name).await?),
    WeaponCommand::Owner { owner } => print_cached(&weapons.by_owner(&owner).await?),
    WeaponCommand::Save { json } => {
      let weapon: Weapon = parse_json("weapon", &json)?;
      print_json(&weapons.save(&weapon).await?)
    }
    WeaponCommand::Delete { name } => print_json(&weapons.delete(&name).await?),
  }
}

async fn run_gallery(cmd: GalleryCommand, session: &Session) -> Result<()> {
  let gallery = GalleryService::new(session);
  match cmd {
    GalleryCommand::List => print_cached(&gallery.list().await?),
    GalleryCommand::Get { id } => print_json(&gallery.get(id).await?),
    GalleryCommand::Save { image_base64 } => {
      print_json(&gallery.save(&GallerySaveRequest { image_base64 }).await?)
    }
    GalleryCommand::Update { id, image_base64 } => {
      print_json(&gallery.update(&GalleryUpdateRequest { id, image_base64 }).await?)
    }
    GalleryCommand::Delete { id } => print_json(&gallery.delete(id).await?),
  }
}

async fn run_damage(names: &[String], refresh: bool, session: &Session) -> Result<()> {
  let damage = DamageService::new(session);
  if refresh {
    for name in names {
      damage.clear(Some(name.as_str()))?;
    }
  }

  let mut reports = Vec::new();
  let mut failures = 0;
  for (name, result) in damage.many(names).await {
    match result {
      Ok(report) => reports.push(json!(report)),
      Err(e) => {
        warn!(%name, error = %e, "damage lookup failed");
        failures += 1;
        reports.push(json!({ "name": name, "error": e.to_string() }));
      }
    }
  }

  print_json(&reports)?;
  if failures == names.len() {
    return Err(eyre!("No damage values could be computed"));
  }
  Ok(())
}

fn run_cache(cmd: CacheCommand, session: &Session) -> Result<()> {
  let cache = session.cache();
  match cmd {
    CacheCommand::Clear { namespace: Some(ns) } => {
      let removed = cache.clear_namespace(&ns)?;
      print_json(&json!({ "namespace": ns, "removed": removed }))
    }
    CacheCommand::Clear { namespace: None } => {
      let removed = cache.clear_except(&[AUTH_NAMESPACE])?;
      print_json(&json!({ "removed": removed }))
    }
    CacheCommand::Status => {
      let lists = [
        GatewayQueryKey::People,
        GatewayQueryKey::Weapons,
        GatewayQueryKey::Gallery,
      ];
      let mut expires = serde_json::Map::new();
      for key in &lists {
        if let Some(at) = cache.expiry(key)? {
          expires.insert(key.description(), json!(at));
        }
      }
      print_json(&json!({
        "namespaces": DATA_NAMESPACES,
        "entries": cache.stats()?,
        "expires": expires,
      }))
    }
  }
}

async fn run_auth(cmd: AuthCommand, session: &Session) -> Result<()> {
  match cmd {
    AuthCommand::Verify => print_json(&session.verify_token().await?),
    AuthCommand::Logout => {
      session.logout().await?;
      print_json(&json!({ "loggedOut": true }))
    }
    AuthCommand::LoginUrl => {
      let sso = session
        .config()
        .sso
        .as_ref()
        .ok_or_else(|| eyre!("No `sso` section in the configuration"))?;
      println!("{}", auth::login_url(sso)?);
      Ok(())
    }
    AuthCommand::SetToken {
      token,
      refresh_token,
    } => {
      session.tokens().set_token(&token)?;
      if let Some(refresh) = refresh_token {
        session.tokens().set_refresh_token(&refresh)?;
      }
      print_json(&json!({ "stored": true }))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("tymctl").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_damage_takes_several_names() {
    match parse(&["damage", "Warrior", "Mage", "--refresh"]) {
      Command::Damage { names, refresh } => {
        assert_eq!(names, vec!["Warrior", "Mage"]);
        assert!(refresh);
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_damage_requires_a_name() {
    assert!(Cli::try_parse_from(["tymctl", "damage"]).is_err());
  }

  #[test]
  fn test_nested_subcommands() {
    assert!(matches!(
      parse(&["people", "get", "Warrior", "--cached"]),
      Command::People(PeopleCommand::Get { cached: true, .. })
    ));
    assert!(matches!(
      parse(&["people", "delete-all"]),
      Command::People(PeopleCommand::DeleteAll)
    ));
    assert!(matches!(
      parse(&["gallery", "update", "3", "--image-base64", "aGk="]),
      Command::Gallery(GalleryCommand::Update { id: 3, image_base64: Some(_) })
    ));
    assert!(matches!(
      parse(&["auth", "set-token", "abc", "--refresh-token", "def"]),
      Command::Auth(AuthCommand::SetToken { .. })
    ));
    assert!(matches!(
      parse(&["people", "sync", "--refresh"]),
      Command::People(PeopleCommand::Sync { refresh: true })
    ));
    assert!(matches!(
      parse(&["cache", "clear"]),
      Command::Cache(CacheCommand::Clear { namespace: None })
    ));
  }

  #[test]
  fn test_parse_json_reports_kind() {
    let err = parse_json::<Person>("person", "{not json").unwrap_err();
    assert!(err.to_string().starts_with("Invalid person JSON"));
  }
}
