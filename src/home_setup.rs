//! Creating and joining homes, and creating profiles.
//!
//! Each operation has more than one way to reach the backend: a server-side
//! RPC that does everything in one transaction, and a sequence of direct
//! table writes for deployments where the RPC is missing. The direct path
//! deletes a home it created when the owner row cannot be written. A
//! [`StrategyChain`] tries them in order, stops at the first success and
//! keeps every failure for the final error.

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use splitfair_common::{Home, HomeId, MemberRole, Profile, UserId};

use crate::backend::{Filter, Query, RecordStore, Row};
use crate::errors::{BackendError, HomeSetupError};
use crate::registration::RegistrationRequest;

/// Letters and digits with look-alikes (`0 O 1 I`) removed. 32 symbols, so
/// one random byte maps onto it without bias.
pub const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LEN: usize = 8;
const MIN_INVITE_CODE_LEN: usize = 6;

/// Ordered fallbacks for one operation.
pub struct StrategyChain<'a, T> {
    operation: String,
    strategies: Vec<(String, BoxFuture<'a, Result<T, BackendError>>)>,
}

impl<'a, T> StrategyChain<'a, T> {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            strategies: Vec::new(),
        }
    }

    /// Append a strategy. The future is not polled unless every earlier
    /// strategy has failed.
    pub fn then<F>(mut self, name: impl Into<String>, strategy: F) -> Self
    where
        F: Future<Output = Result<T, BackendError>> + Send + 'a,
    {
        self.strategies.push((name.into(), strategy.boxed()));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn run(self) -> Result<T, HomeSetupError> {
        let mut attempts = Vec::new();
        for (name, strategy) in self.strategies {
            match strategy.await {
                Ok(value) => {
                    tracing::debug!(operation = %self.operation, strategy = %name, failed_before = attempts.len(), "strategy succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(operation = %self.operation, strategy = %name, error = %e, "strategy failed");
                    attempts.push((name, e));
                }
            }
        }
        tracing::error!(operation = %self.operation, attempts = attempts.len(), "all strategies failed");
        Err(HomeSetupError::Exhausted {
            operation: self.operation,
            attempts,
        })
    }
}

/// A fresh invite code drawn from [`INVITE_ALPHABET`].
pub fn generate_invite_code() -> String {
    let uuid = uuid::Uuid::new_v4();
    uuid.as_bytes()
        .iter()
        .enumerate()
        // bytes 6 and 8 carry the version and variant bits
        .filter(|(i, _)| *i != 6 && *i != 8)
        .take(INVITE_CODE_LEN)
        .map(|(_, b)| INVITE_ALPHABET[(*b as usize) % INVITE_ALPHABET.len()] as char)
        .collect()
}

/// Trim and uppercase a typed code, rejecting anything that could not have
/// been generated.
pub fn normalize_invite_code(raw: &str) -> Result<String, HomeSetupError> {
    let code = raw.trim().to_uppercase();
    let valid_len = (MIN_INVITE_CODE_LEN..=INVITE_CODE_LEN).contains(&code.len());
    if !valid_len || !code.bytes().all(|b| INVITE_ALPHABET.contains(&b)) {
        return Err(HomeSetupError::InvalidInviteCode(raw.trim().to_string()));
    }
    Ok(code)
}

fn decode<T: DeserializeOwned>(table: &str, row: Row) -> Result<T, BackendError> {
    serde_json::from_value(row).map_err(|source| BackendError::Decode {
        table: table.to_string(),
        source,
    })
}

#[derive(Clone)]
pub struct HomeSetup {
    store: Arc<dyn RecordStore>,
}

impl HomeSetup {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create a home owned by `owner`, with a fresh invite code.
    pub async fn create_home(&self, name: &str, owner: &UserId) -> Result<Home, HomeSetupError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HomeSetupError::EmptyHomeName);
        }
        let invite_code = generate_invite_code();
        let store = self.store.as_ref();

        let home = StrategyChain::new("create_home")
            .then("rpc:create_home_with_member", async {
                let row = store
                    .rpc(
                        "create_home_with_member",
                        json!({"name": name, "invite_code": invite_code, "user_id": owner}),
                    )
                    .await?;
                decode::<Home>("homes", row)
            })
            .then("insert:homes+home_members", async {
                let row = store
                    .insert(
                        "homes",
                        json!({"name": name, "invite_code": invite_code, "created_by": owner}),
                    )
                    .await?;
                let home = decode::<Home>("homes", row)?;
                if let Err(e) = add_member(store, &home.id, owner, MemberRole::Owner).await {
                    discard_home(store, &home.id).await;
                    return Err(e);
                }
                Ok(home)
            })
            .run()
            .await?;

        tracing::info!(home = %home.id, owner = %owner, "home created");
        Ok(home)
    }

    /// Join the home behind `code`. Joining a home twice is not an error.
    pub async fn join_home(&self, code: &str, user: &UserId) -> Result<Home, HomeSetupError> {
        let code = normalize_invite_code(code)?;
        let store = self.store.as_ref();

        let result = StrategyChain::new("join_home")
            .then("rpc:join_home_by_code", async {
                let row = store
                    .rpc("join_home_by_code", json!({"invite_code": code, "user_id": user}))
                    .await?;
                decode::<Home>("homes", row)
            })
            .then("lookup+insert:home_members", async {
                let rows = store
                    .select(Query::table("homes").filter(Filter::eq("invite_code", code.as_str())))
                    .await?;
                let row = rows.into_iter().next().ok_or_else(|| BackendError::NotFound {
                    table: "homes".to_string(),
                    id: code.clone(),
                })?;
                let home = decode::<Home>("homes", row)?;
                if !is_member(store, &home.id, user).await? {
                    add_member(store, &home.id, user, MemberRole::Member).await?;
                }
                Ok(home)
            })
            .run()
            .await;

        match result {
            Ok(home) => {
                tracing::info!(home = %home.id, user = %user, "joined home");
                Ok(home)
            }
            // Every path either could not find the code or does not exist on
            // this deployment.
            Err(HomeSetupError::Exhausted { attempts, .. })
                if attempts
                    .iter()
                    .any(|(_, e)| matches!(e, BackendError::NotFound { .. }))
                    && attempts.iter().all(|(_, e)| {
                        matches!(e, BackendError::NotFound { .. } | BackendError::UnknownRpc(_))
                    }) =>
            {
                Err(HomeSetupError::UnknownInviteCode(code))
            }
            Err(e) => Err(e),
        }
    }

    /// Store the profile for a freshly registered user.
    pub async fn create_profile(
        &self,
        request: &RegistrationRequest,
        user: &UserId,
    ) -> Result<Profile, HomeSetupError> {
        let row = json!({
            "id": user,
            "full_name": request.full_name,
            "email": request.email,
            "phone": request.phone,
        });
        let store = self.store.as_ref();

        let profile = StrategyChain::new("create_profile")
            .then("rpc:create_profile", async {
                let created = store.rpc("create_profile", row.clone()).await?;
                decode::<Profile>("profiles", created)
            })
            .then("insert:profiles", async {
                let created = store.insert("profiles", row.clone()).await?;
                decode::<Profile>("profiles", created)
            })
            .run()
            .await?;

        tracing::info!(user = %user, "profile created");
        Ok(profile)
    }
}

async fn is_member(store: &dyn RecordStore, home: &HomeId, user: &UserId) -> Result<bool, BackendError> {
    let rows = store
        .select(
            Query::table("home_members")
                .filter(Filter::eq("home_id", home.as_str()))
                .filter(Filter::eq("user_id", user.as_str())),
        )
        .await?;
    Ok(!rows.is_empty())
}

/// Remove a home whose owner could not be added, so its invite code does
/// not stay live.
async fn discard_home(store: &dyn RecordStore, home: &HomeId) {
    match store.delete("homes", home.as_str()).await {
        Ok(()) => tracing::debug!(home = %home, "discarded ownerless home"),
        Err(e) => tracing::error!(home = %home, error = %e, "failed to discard ownerless home"),
    }
}

async fn add_member(
    store: &dyn RecordStore,
    home: &HomeId,
    user: &UserId,
    role: MemberRole,
) -> Result<Value, BackendError> {
    store
        .insert(
            "home_members",
            json!({"home_id": home, "user_id": user, "role": role.as_str()}),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (MemoryBackend, HomeSetup) {
        let backend = MemoryBackend::new();
        let setup = HomeSetup::new(Arc::new(backend.clone()));
        (backend, setup)
    }

    fn members(backend: &MemoryBackend) -> Vec<(String, String, String)> {
        backend
            .rows("home_members")
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    r["home_id"].as_str().unwrap().to_string(),
                    r["user_id"].as_str().unwrap().to_string(),
                    r["role"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chain_short_circuits_on_first_success() {
        let polled = AtomicUsize::new(0);
        let value = StrategyChain::new("op")
            .then("first", async { Ok(1) })
            .then("second", async {
                polled.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .run()
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_aggregates_failures_in_order() {
        let err = StrategyChain::<()>::new("op")
            .then("a", async { Err(BackendError::UnknownRpc("a".to_string())) })
            .then("b", async { Err(BackendError::Injected("b".to_string())) })
            .run()
            .await
            .unwrap_err();
        match err {
            HomeSetupError::Exhausted { operation, attempts } => {
                assert_eq!(operation, "op");
                let names: Vec<&str> = attempts.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let chain = StrategyChain::<()>::new("nothing");
        assert!(chain.is_empty());
        assert!(matches!(
            chain.run().await,
            Err(HomeSetupError::Exhausted { attempts, .. }) if attempts.is_empty()
        ));
    }

    #[test]
    fn test_invite_codes_use_the_alphabet() {
        for _ in 0..50 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert!(code.bytes().all(|b| INVITE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_normalize_invite_code() {
        assert_eq!(normalize_invite_code("  abcd2345 ").unwrap(), "ABCD2345");
        assert_eq!(normalize_invite_code("ABC234").unwrap(), "ABC234");
        assert!(normalize_invite_code("ABC23").is_err());
        assert!(normalize_invite_code("ABCD23456").is_err());
        // 0 and O are excluded
        assert!(normalize_invite_code("ABCD0O23").is_err());
    }

    #[tokio::test]
    async fn test_create_home_via_rpc() {
        let (backend, setup) = setup();
        let home = setup.create_home("  Flat 4 ", &UserId::from("u1")).await.unwrap();
        assert_eq!(home.name, "Flat 4");
        assert_eq!(home.invite_code.len(), INVITE_CODE_LEN);
        assert_eq!(
            members(&backend),
            vec![(home.id.to_string(), "u1".to_string(), "owner".to_string())]
        );
    }

    #[tokio::test]
    async fn test_create_home_falls_back_to_inserts() {
        let (backend, setup) = setup();
        backend.set_rpc_enabled(false).unwrap();
        let home = setup.create_home("Flat 4", &UserId::from("u1")).await.unwrap();
        assert_eq!(backend.rows("homes").unwrap().len(), 1);
        assert_eq!(members(&backend)[0].0, home.id.to_string());
    }

    #[tokio::test]
    async fn test_create_home_reports_every_failed_strategy() {
        let (backend, setup) = setup();
        backend.set_rpc_enabled(false).unwrap();
        backend.deny_inserts("homes").unwrap();
        let err = setup.create_home("Flat 4", &UserId::from("u1")).await.unwrap_err();
        match err {
            HomeSetupError::Exhausted { attempts, .. } => {
                assert!(matches!(attempts[0].1, BackendError::UnknownRpc(_)));
                assert!(matches!(attempts[1].1, BackendError::Status { status: 403, .. }));
            }
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_home_leaves_no_home_when_members_are_denied() {
        let (backend, setup) = setup();
        backend.deny_inserts("home_members").unwrap();
        let err = setup.create_home("Flat 4", &UserId::from("u1")).await.unwrap_err();
        match err {
            HomeSetupError::Exhausted { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert!(
                    attempts
                        .iter()
                        .all(|(_, e)| matches!(e, BackendError::Status { status: 403, .. }))
                );
            }
            other => panic!("Expected Exhausted, got {:?}", other),
        }
        assert!(backend.rows("homes").unwrap().is_empty());
        assert!(backend.rows("home_members").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_home_rejects_blank_name() {
        let (_backend, setup) = setup();
        assert!(matches!(
            setup.create_home("   ", &UserId::from("u1")).await,
            Err(HomeSetupError::EmptyHomeName)
        ));
    }

    #[tokio::test]
    async fn test_join_home_twice_is_ok_on_both_paths() {
        let (backend, setup) = setup();
        let home = setup.create_home("Flat 4", &UserId::from("u1")).await.unwrap();
        let code = home.invite_code.to_lowercase();

        setup.join_home(&code, &UserId::from("u2")).await.unwrap();
        setup.join_home(&code, &UserId::from("u2")).await.unwrap();
        backend.set_rpc_enabled(false).unwrap();
        let joined = setup.join_home(&code, &UserId::from("u2")).await.unwrap();
        assert_eq!(joined.id, home.id);
        assert_eq!(members(&backend).len(), 2);

        setup.join_home(&code, &UserId::from("u3")).await.unwrap();
        assert_eq!(members(&backend).len(), 3);
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let (_backend, setup) = setup();
        let err = setup.join_home("ZZZZ2222", &UserId::from("u2")).await.unwrap_err();
        assert!(matches!(err, HomeSetupError::UnknownInviteCode(code) if code == "ZZZZ2222"));
        assert!(matches!(
            setup.join_home("no", &UserId::from("u2")).await,
            Err(HomeSetupError::InvalidInviteCode(_))
        ));
    }

    #[tokio::test]
    async fn test_join_unknown_code_without_rpc() {
        let (backend, setup) = setup();
        backend.set_rpc_enabled(false).unwrap();
        let err = setup.join_home("ZZZZ2222", &UserId::from("u2")).await.unwrap_err();
        assert!(matches!(err, HomeSetupError::UnknownInviteCode(_)));

        // A lookup that fails for another reason is not an unknown code.
        backend.set_fetch_failure(Some("offline")).unwrap();
        assert!(matches!(
            setup.join_home("ZZZZ2222", &UserId::from("u2")).await,
            Err(HomeSetupError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_profile_with_fallback() {
        let (backend, setup) = setup();
        let request = RegistrationRequest {
            email: "alex@example.com".to_string(),
            password: "hunter22".to_string(),
            full_name: "Alex Doe".to_string(),
            phone: None,
        };
        let profile = setup.create_profile(&request, &UserId::from("u1")).await.unwrap();
        assert_eq!(profile.full_name, "Alex Doe");

        backend.set_rpc_enabled(false).unwrap();
        let profile = setup.create_profile(&request, &UserId::from("u2")).await.unwrap();
        assert_eq!(profile.id, UserId::from("u2"));
        assert_eq!(backend.rows("profiles").unwrap().len(), 2);
    }
}
