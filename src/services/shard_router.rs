//! Weapon-family shard routing
//!
//! Items are partitioned across three physical stores ordered
//! `[pistol, rifle, other]`. Writes go to exactly one shard; reads scatter
//! across all of them and tolerate individual shard failures.

use futures_util::future::join_all;
use sea_orm::{
    ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, TransactionError, TransactionTrait,
};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::prelude::Skins;
use crate::error::{PipelineError, Result};

/// Number of physical stores a sharded deployment expects
pub const SHARD_COUNT: usize = 3;

const PISTOLS: &[&str] = &[
    "glock-18",
    "usp-s",
    "p2000",
    "p250",
    "five-seven",
    "tec-9",
    "cz75-auto",
    "desert eagle",
    "dual berettas",
    "r8 revolver",
];

const RIFLES: &[&str] = &[
    "ak-47",
    "m4a4",
    "m4a1-s",
    "awp",
    "ssg 08",
    "scar-20",
    "g3sg1",
    "aug",
    "sg 553",
    "famas",
    "galil ar",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeaponFamily {
    Pistol,
    Rifle,
    Other,
}

impl WeaponFamily {
    /// Shard order
    pub const ALL: [WeaponFamily; SHARD_COUNT] =
        [WeaponFamily::Pistol, WeaponFamily::Rifle, WeaponFamily::Other];

    pub fn index(&self) -> usize {
        match self {
            WeaponFamily::Pistol => 0,
            WeaponFamily::Rifle => 1,
            WeaponFamily::Other => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeaponFamily::Pistol => "pistol",
            WeaponFamily::Rifle => "rifle",
            WeaponFamily::Other => "other",
        }
    }
}

impl std::fmt::Display for WeaponFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive substring match, pistols checked before rifles.
pub fn weapon_family(weapon: &str) -> WeaponFamily {
    let weapon = weapon.to_lowercase();
    if PISTOLS.iter().any(|p| weapon.contains(p)) {
        WeaponFamily::Pistol
    } else if RIFLES.iter().any(|r| weapon.contains(r)) {
        WeaponFamily::Rifle
    } else {
        WeaponFamily::Other
    }
}

/// Runs `f` inside a transaction on `db`, flattening sea-orm's
/// transaction error into the pipeline error.
pub async fn run_in_txn<T, F>(db: &DatabaseConnection, f: F) -> Result<T>
where
    T: Send,
    F: for<'c> FnOnce(
            &'c DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>
        + Send,
{
    db.transaction::<_, T, PipelineError>(f)
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => PipelineError::Database(db_err),
            TransactionError::Transaction(err) => err,
        })
}

/// Connect a pool the way every store in the process is connected
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(url.to_string());
    opts.max_connections(max_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Ok(Database::connect(opts).await?)
}

#[derive(Clone)]
pub struct ShardRouter {
    shards: Vec<DatabaseConnection>,
}

impl ShardRouter {
    /// `shards` must be ordered `[pistol, rifle, other]`
    pub fn new(shards: Vec<DatabaseConnection>) -> Result<Self> {
        if shards.len() != SHARD_COUNT {
            return Err(PipelineError::BadConfig(format!(
                "expected {} shards, got {}",
                SHARD_COUNT,
                shards.len()
            )));
        }
        Ok(Self { shards })
    }

    /// Connects every shard; any connect failure is fatal.
    pub async fn connect(urls: &[String], pool_max: u32) -> Result<Self> {
        if urls.len() != SHARD_COUNT {
            return Err(PipelineError::BadConfig(format!(
                "SHARD_URLS must list exactly {} urls, got {}",
                SHARD_COUNT,
                urls.len()
            )));
        }

        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for (family, url) in WeaponFamily::ALL.iter().zip(urls) {
            info!(shard = %family, "Connecting shard");
            let db = connect_pool(url, pool_max).await.map_err(|e| {
                PipelineError::Fatal(format!("shard {} unreachable: {}", family, e))
            })?;
            shards.push(db);
        }

        Self::new(shards)
    }

    pub fn shard(&self, family: WeaponFamily) -> &DatabaseConnection {
        &self.shards[family.index()]
    }

    /// Resolve the single shard that owns items of this weapon
    pub fn shard_for_weapon(&self, weapon: &str) -> Result<(WeaponFamily, &DatabaseConnection)> {
        let family = weapon_family(weapon);
        self.shards
            .get(family.index())
            .map(|db| (family, db))
            .ok_or_else(|| PipelineError::BadConfig(format!("no shard for family {}", family)))
    }

    pub fn shards(&self) -> impl Iterator<Item = (WeaponFamily, &DatabaseConnection)> {
        WeaponFamily::ALL.into_iter().zip(self.shards.iter())
    }

    /// Runs the same operation on every shard concurrently. Failed shards are
    /// logged and left out of the result.
    pub async fn scatter<T, F, Fut>(&self, op: &str, f: F) -> Vec<(WeaponFamily, T)>
    where
        F: Fn(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let futures = self
            .shards()
            .map(|(family, db)| {
                let fut = f(db.clone());
                async move { (family, fut.await) }
            })
            .collect::<Vec<_>>();

        join_all(futures)
            .await
            .into_iter()
            .filter_map(|(family, result)| match result {
                Ok(value) => Some((family, value)),
                Err(e) => {
                    warn!(shard = %family, op = op, error = %e, "Shard query failed, omitting its rows");
                    None
                }
            })
            .collect()
    }

    /// Concatenates row sets from every reachable shard. Global order is not
    /// preserved; callers re-sort and re-limit.
    pub async fn scatter_select<T, F, Fut>(&self, op: &str, f: F) -> Vec<T>
    where
        F: Fn(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.scatter(op, f)
            .await
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .collect()
    }

    /// Sums per-shard counts. Missing shards yield a partial count.
    pub async fn count<F, Fut>(&self, op: &str, f: F) -> u64
    where
        F: Fn(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let counts = self.scatter(op, f).await;
        if counts.len() < SHARD_COUNT {
            warn!(
                op = op,
                reachable = counts.len(),
                expected = SHARD_COUNT,
                "Partial count, some shards unavailable"
            );
        }
        counts.into_iter().map(|(_, n)| n).sum()
    }

    /// First hit across shards in shard order. When nothing matches the
    /// answer is `NotFound`, unless a shard failed, in which case that
    /// failure is returned since the row may live there.
    pub async fn find_first<T, F, Fut>(&self, what: &str, f: F) -> Result<(WeaponFamily, T)>
    where
        F: Fn(DatabaseConnection) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let futures = self
            .shards()
            .map(|(family, db)| {
                let fut = f(db.clone());
                async move { (family, fut.await) }
            })
            .collect::<Vec<_>>();

        let mut failure = None;
        for (family, result) in join_all(futures).await {
            match result {
                Ok(Some(row)) => return Ok((family, row)),
                Ok(None) => {}
                Err(e) => {
                    warn!(shard = %family, lookup = what, error = %e, "Shard lookup failed");
                    failure = Some(e);
                }
            }
        }

        Err(failure.unwrap_or_else(|| PipelineError::NotFound(what.to_string())))
    }

    /// Which shard holds an item id, asking every shard
    pub async fn locate(&self, id: Uuid) -> Result<WeaponFamily> {
        let (family, _) = self
            .find_first(&format!("skin {}", id), |db| async move {
                let hits = Skins::find_by_id(id).count(&db).await?;
                Ok((hits > 0).then_some(()))
            })
            .await?;
        Ok(family)
    }

    /// Runs `f` in a transaction on the shard owning item `id`.
    pub async fn txn_by_id<T, F>(&self, id: Uuid, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>
            + Send,
    {
        let family = self.locate(id).await?;
        run_in_txn(self.shard(family), f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_family_routing() {
        assert_eq!(weapon_family("AK-47"), WeaponFamily::Rifle);
        assert_eq!(weapon_family("ak-47"), WeaponFamily::Rifle);
        assert_eq!(weapon_family("AWP"), WeaponFamily::Rifle);
        assert_eq!(weapon_family("Galil AR"), WeaponFamily::Rifle);
        assert_eq!(weapon_family("Glock-18"), WeaponFamily::Pistol);
        assert_eq!(weapon_family("five-seven"), WeaponFamily::Pistol);
        assert_eq!(weapon_family("Desert Eagle"), WeaponFamily::Pistol);
        assert_eq!(weapon_family("Karambit"), WeaponFamily::Other);
        assert_eq!(weapon_family("★ Butterfly Knife"), WeaponFamily::Other);
        assert_eq!(weapon_family(""), WeaponFamily::Other);
    }

    #[test]
    fn test_pistols_checked_first() {
        // Tokens from both lists resolve to pistols
        assert_eq!(weapon_family("USP-S AUG combo"), WeaponFamily::Pistol);
    }

    #[test]
    fn test_routing_is_case_insensitive() {
        for weapon in RIFLES.iter().chain(PISTOLS.iter()) {
            assert_eq!(weapon_family(weapon), weapon_family(&weapon.to_uppercase()));
        }
    }

    #[test]
    fn test_shard_order() {
        let indexes: Vec<usize> = WeaponFamily::ALL.iter().map(|f| f.index()).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_new_rejects_wrong_shard_count() {
        assert!(matches!(
            ShardRouter::new(Vec::new()),
            Err(PipelineError::BadConfig(_))
        ));
    }
}
