use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use starberry_auth::{
    AuthError, AuthenticationProvider, CombineAuthenticationProvider, Credentials, User, UsernamePasswordCredentials,
};

struct Succeeds(User);

#[async_trait]
impl AuthenticationProvider for Succeeds {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<User, AuthError> {
        Ok(self.0.clone())
    }
}

struct Fails(&'static str, Duration);

#[async_trait]
impl AuthenticationProvider for Fails {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<User, AuthError> {
        tokio::time::sleep(self.1).await;
        Err(AuthError::authentication(self.0))
    }
}

fn credentials() -> Credentials {
    UsernamePasswordCredentials::new("user", "pass").into()
}

#[tokio::test]
async fn empty_list_fails() {
    for combined in [CombineAuthenticationProvider::any(), CombineAuthenticationProvider::all()] {
        let err = combined.authenticate(&credentials()).await.unwrap_err();
        assert_eq!(err.to_string(), "The combined providers list is empty.");
    }
}

#[tokio::test]
async fn any_reports_the_aggregate_message() {
    let combined = CombineAuthenticationProvider::any().with(Arc::new(Fails("boom", Duration::ZERO)));
    let err = combined.authenticate(&credentials()).await.unwrap_err();
    assert_eq!(err.to_string(), "No provider capable of performing this operation.");
    assert_eq!(err.root_cause().to_string(), "boom");
}

#[tokio::test]
async fn any_returns_the_first_success() {
    let combined = CombineAuthenticationProvider::any()
        .with(Arc::new(Fails("first", Duration::ZERO)))
        .with(Arc::new(Succeeds(User::new("second"))))
        .with(Arc::new(Succeeds(User::new("third"))));
    assert_eq!(combined.authenticate(&credentials()).await.unwrap().name(), "second");
}

#[tokio::test]
async fn all_merges_in_list_order() {
    let a = User::new("a").with_roles(["USER"]).with_attribute("shared", json!("a"));
    let b = User::new("b").with_roles(["ADMIN"]).with_attribute("shared", json!("b"));
    let combined = CombineAuthenticationProvider::all()
        .with(Arc::new(Succeeds(a.clone())))
        .with(Arc::new(Succeeds(b.clone())));
    assert_eq!(combined.authenticate(&credentials()).await.unwrap(), a.merge(&b));
}

#[tokio::test]
async fn all_reports_the_earliest_failure_in_list_order() {
    // The second provider fails first in time; the first in the list still wins.
    let combined = CombineAuthenticationProvider::all()
        .with(Arc::new(Fails("slow", Duration::from_millis(50))))
        .with(Arc::new(Fails("fast", Duration::ZERO)))
        .with(Arc::new(Succeeds(User::new("ok"))));
    let err = combined.authenticate(&credentials()).await.unwrap_err();
    assert_eq!(err.to_string(), "slow");
}

#[tokio::test]
async fn all_stops_once_the_earliest_failure_is_known() {
    let combined = CombineAuthenticationProvider::all()
        .with(Arc::new(Succeeds(User::new("ok"))))
        .with(Arc::new(Fails("fast", Duration::from_millis(10))))
        .with(Arc::new(Fails("stuck", Duration::from_secs(60))));
    let err = tokio::time::timeout(Duration::from_secs(5), combined.authenticate(&credentials()))
        .await
        .expect("later providers are not awaited")
        .unwrap_err();
    assert_eq!(err.to_string(), "fast");
}

#[tokio::test]
async fn invalid_credentials_never_reach_providers() {
    let combined = CombineAuthenticationProvider::any().with(Arc::new(Succeeds(User::new("ok"))));
    let blank = Credentials::from(UsernamePasswordCredentials::new(" ", "pass"));
    assert!(matches!(combined.authenticate(&blank).await, Err(AuthError::CredentialValidation(_))));
}

#[tokio::test]
async fn providers_can_be_added_while_shared() {
    let combined = Arc::new(CombineAuthenticationProvider::any());
    let writer = {
        let combined = combined.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                combined.add(Arc::new(Succeeds(User::new(format!("u{}", i)))));
            }
        })
    };
    writer.await.unwrap();
    assert_eq!(combined.len(), 10);
    assert_eq!(combined.authenticate(&credentials()).await.unwrap().name(), "u0");
}
