//! Middleware gating every outgoing request behind the current session
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`SessionGate`] in the middleware stack. Before each
//! request is dispatched the gate checks the stored session: a locally
//! expired access token cancels the request outright (it never reaches
//! the network) and tears the session down, while a live token is
//! attached as a bearer credential — unless the request leaves the
//! configured origin or targets an auth-free path such as sign-in.
//!
//! After dispatch, a 401 or 403 on a gated path is handed to the
//! session crate's renewal coordinator. However many requests fail at
//! once, a single renewal exchange runs; each rejected request is then
//! replayed exactly once with the replacement credential. If the
//! renewal fails, every queued request observes the renewal's error and
//! the session is gone by the time they do.
//!
//! ```no_run
//! use std::sync::Arc;
//! use agora_reqwest::SessionGate;
//! use agora_sessions::{
//!     coordinator::RenewalCoordinator,
//!     notify::NullNotificationStream,
//!     renewal::RenewalClient,
//!     store::InMemorySessionStore,
//!     terminator::{NullNavigator, SessionTerminator},
//!     GateConfig,
//! };
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let config = Arc::new(GateConfig::new(
//!     "https://board.example.com".parse().unwrap(),
//! ));
//! let store = Arc::new(InMemorySessionStore::new());
//! let notifications = Arc::new(NullNotificationStream);
//! let terminator = SessionTerminator::new(
//!     store.clone(),
//!     notifications.clone(),
//!     Arc::new(NullNavigator),
//!     "/auth/sign-in",
//! );
//! let renewer = Arc::new(RenewalClient::new(
//!     Client::new(),
//!     config.renew_url(),
//!     store.clone(),
//! ));
//! let coordinator =
//!     RenewalCoordinator::new(renewer, store.clone(), notifications, terminator.clone());
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(SessionGate::new(config, store, coordinator, terminator))
//!     .build();
//!
//! let response = client.get("https://board.example.com/boards").send().await;
//! # let _ = response;
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use agora_sessions::{
    config::GateConfig, coordinator::RenewalCoordinator, store::SessionStore,
    terminator::SessionTerminator, AccessTokenRef, GateError,
};
use aliri_clock::{Clock, System};
use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode, Url};
use reqwest_middleware::{Error, Middleware, Next, Result};

/// Marker recorded in a request's extensions once the gate has renewed
/// and replayed it
///
/// A request carrying this marker is never handled a second time: its
/// failures pass through to the caller unmodified.
#[derive(Clone, Copy, Debug)]
pub struct ReplayedOnce;

/// A middleware that authenticates outgoing requests against the stored
/// session and transparently renews the session when the server rejects
/// its credential
#[derive(Clone)]
pub struct SessionGate<C = System> {
    store: Arc<dyn SessionStore>,
    coordinator: RenewalCoordinator,
    terminator: SessionTerminator,
    config: Arc<GateConfig>,
    same_origin: SameOrigin,
    auth_free: AuthFreePath,
    clock: C,
}

impl SessionGate<System> {
    /// Constructs a new gate over the given collaborators
    pub fn new(
        config: Arc<GateConfig>,
        store: Arc<dyn SessionStore>,
        coordinator: RenewalCoordinator,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            store,
            coordinator,
            terminator,
            same_origin: SameOrigin::new(config.base_url().clone()),
            auth_free: AuthFreePath::new(config.clone()),
            config,
            clock: System,
        }
    }
}

impl<C> SessionGate<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> SessionGate<D> {
        SessionGate {
            store: self.store,
            coordinator: self.coordinator,
            terminator: self.terminator,
            config: self.config,
            same_origin: self.same_origin,
            auth_free: self.auth_free,
            clock,
        }
    }
}

fn bearer_header(token: &AccessTokenRef) -> header::HeaderValue {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value).expect("only valid header bytes");
    value.set_sensitive(true);
    value
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait::async_trait]
impl<C> Middleware for SessionGate<C>
where
    C: Clock + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let session = match self.store.read().await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(error = %error, "unable to read the session store, proceeding unauthenticated");
                None
            }
        };

        // Expiry is checked before any exemption applies: a locally
        // stale credential tears the session down even when this
        // particular request would have been exempt.
        if let Some(session) = &session {
            if session.is_expired_with_clock(&self.clock) {
                tracing::info!("access credential expired before dispatch, tearing down");
                self.terminator.terminate().await;
                return Err(Error::Middleware(anyhow::Error::new(
                    GateError::PreflightExpired,
                )));
            }
        }

        let same_origin = self.same_origin.eval(&req);
        let auth_free = self.auth_free.eval(&req);
        let renewal_call = self.config.is_renewal_path(req.url().path());
        let path = req.url().path().to_owned();

        if same_origin && !auth_free {
            if let Some(session) = &session {
                req.headers_mut()
                    .entry(header::AUTHORIZATION)
                    .or_insert_with(|| bearer_header(session.access_token()));
            }
        }

        let eligible = same_origin
            && !auth_free
            && !renewal_call
            && extensions.get::<ReplayedOnce>().is_none();
        let replay = if eligible { req.try_clone() } else { None };

        let response = next.clone().run(req, extensions).await?;

        if !eligible || !is_auth_failure(response.status()) {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            tracing::warn!(%path, "request body cannot be replayed, returning the rejection as-is");
            return Ok(response);
        };

        extensions.insert(ReplayedOnce);

        tracing::debug!(
            %path,
            response.status = response.status().as_u16(),
            "credential rejected, requesting renewal"
        );

        let token = match self.coordinator.renew().await {
            Ok(token) => token,
            Err(error) => {
                return Err(Error::Middleware(anyhow::Error::new(GateError::from(
                    error,
                ))))
            }
        };

        tracing::debug!(%path, "replaying request with the renewed credential");
        replay
            .headers_mut()
            .insert(header::AUTHORIZATION, bearer_header(&token));
        next.run(replay, extensions).await
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionGate<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionGate")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Only consider a request if it shares the configured base origin
///
/// Requests leaving the origin are never annotated with a credential and
/// never trigger renewal handling.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    base: Url,
}

impl SameOrigin {
    /// Constructs a predicate matching `base`'s origin
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        let url = req.url();
        url.scheme() == self.base.scheme()
            && url.host_str() == self.base.host_str()
            && url.port_or_known_default() == self.base.port_or_known_default()
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    origin_of(req.url()),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&origin_of(&self.base))
    }
}

fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or("<no host>");
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Only consider a request if its path is on the auth-free allow-list
///
/// Allow-listed paths carry the flows that by definition run without a
/// session: sign-in, sign-up, availability checks, and the renewal
/// exchange itself.
#[derive(Clone, Debug)]
pub struct AuthFreePath {
    config: Arc<GateConfig>,
}

impl AuthFreePath {
    /// Constructs a predicate over the configured allow-list
    pub fn new(config: Arc<GateConfig>) -> Self {
        Self { config }
    }
}

impl Predicate<Request> for AuthFreePath {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        self.config.is_auth_free(req.url().path())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "path",
                    req.url().path().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for AuthFreePath {}
impl fmt::Display for AuthFreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path is auth-free")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use agora_sessions::{
        notify::NullNotificationStream,
        renewal::{RenewalClient, RenewalError, RenewalSource},
        store::InMemorySessionStore,
        terminator::Navigator,
        AccessToken, RenewalToken, Session, UnixMillis,
    };
    use aliri_clock::{TestClock, UnixTime};
    use async_trait::async_trait;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    const BASE: &str = "https://board.example.com";
    const NOW: UnixTime = UnixTime(1_700_000_000);

    const STALE_TOKEN: &str = "stale-token";
    const FRESH_TOKEN: &str = "fresh-token";
    const BEARER_STALE_TOKEN: &str = "Bearer stale-token";
    const BEARER_FRESH_TOKEN: &str = "Bearer fresh-token";

    fn valid_session() -> Session {
        Session::new(
            AccessToken::from_static(STALE_TOKEN),
            Some(RenewalToken::from_static("stale-renewal")),
            Some(UnixMillis(1_700_000_060_000)),
        )
    }

    fn expired_session() -> Session {
        Session::new(
            AccessToken::from_static(STALE_TOKEN),
            Some(RenewalToken::from_static("stale-renewal")),
            Some(UnixMillis(1_699_999_999_999)),
        )
    }

    fn fresh_session() -> Session {
        Session::new(
            AccessToken::from_static(FRESH_TOKEN),
            Some(RenewalToken::from_static("fresh-renewal")),
            Some(UnixMillis(1_700_000_600_000)),
        )
    }

    enum Renewal {
        Succeed,
        Fail,
    }

    struct FakeRenewalSource {
        exchanges: Arc<AtomicUsize>,
        outcome: Renewal,
    }

    #[async_trait]
    impl RenewalSource for FakeRenewalSource {
        async fn renew(&self) -> std::result::Result<Session, RenewalError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            // Suspend so that every concurrently rejected request joins
            // the queue behind this exchange.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            match self.outcome {
                Renewal::Succeed => Ok(fresh_session()),
                Renewal::Fail => Err(RenewalError::CredentialMissing),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        redirects: AtomicUsize,
    }

    impl Navigator for RecordingNavigator {
        fn replace_location(&self, _: &str) {
            self.redirects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        gate: SessionGate<TestClock>,
        store: Arc<InMemorySessionStore>,
        exchanges: Arc<AtomicUsize>,
        navigator: Arc<RecordingNavigator>,
    }

    async fn fixture(session: Option<Session>, outcome: Renewal) -> Fixture {
        let store = Arc::new(InMemorySessionStore::new());
        if let Some(session) = session {
            store.write(&session).await.unwrap();
        }

        let config = Arc::new(GateConfig::new(BASE.parse().unwrap()));
        let exchanges = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(FakeRenewalSource {
            exchanges: exchanges.clone(),
            outcome,
        });
        let navigator = Arc::new(RecordingNavigator::default());
        let notifications = Arc::new(NullNotificationStream);
        let terminator = SessionTerminator::new(
            store.clone(),
            notifications.clone(),
            navigator.clone(),
            "/auth/sign-in",
        );
        let coordinator =
            RenewalCoordinator::new(source, store.clone(), notifications, terminator.clone());
        let gate = SessionGate::new(config, store.clone(), coordinator, terminator)
            .with_clock(TestClock::new(NOW));

        Fixture {
            gate,
            store,
            exchanges,
            navigator,
        }
    }

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    /// Rejects with 401 unless the request carries `accept`
    struct StatusSwitch {
        accept: String,
        hits: AtomicUsize,
    }

    impl StatusSwitch {
        fn accepting(accept: impl Into<String>) -> Self {
            Self {
                accept: accept.into(),
                hits: AtomicUsize::new(0),
            }
        }

        fn rejecting_everything() -> Self {
            Self::accepting("Bearer nothing-matches-this")
        }
    }

    #[async_trait::async_trait]
    impl Middleware for StatusSwitch {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let authorized = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                == Some(self.accept.as_str());

            let mut resp = http::Response::<&[u8]>::default();
            if !authorized {
                *resp.status_mut() = StatusCode::UNAUTHORIZED;
            }
            Ok(resp.into())
        }
    }

    #[derive(Default)]
    struct NeverReached {
        reached: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NeverReached {
        async fn handle(
            &self,
            _: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            self.reached.store(true, Ordering::Release);
            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    mod when_the_session_is_valid {
        use super::*;

        #[tokio::test]
        async fn attaches_the_bearer_token_on_a_same_origin_request() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let checker = Arc::new(AuthChecker::new(BEARER_STALE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(checker.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn does_not_annotate_an_auth_free_path() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(checker.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/auth/sign-in"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn does_not_annotate_a_cross_origin_request() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(checker.clone())
                .build();

            let resp = client
                .get("https://elsewhere.example.com/boards")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn preserves_a_caller_supplied_authorization_header() {
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(checker.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/boards"))
                .bearer_auth("overridden!")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(checker.checked.load(Ordering::Acquire));
        }
    }

    mod when_no_session_is_held {
        use super::*;

        #[tokio::test]
        async fn sends_the_request_unannotated() {
            let f = fixture(None, Renewal::Succeed).await;
            let checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(checker.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn a_rejection_still_fails_the_renewal_and_tears_down() {
            let f = fixture(None, Renewal::Fail).await;
            let switch = Arc::new(StatusSwitch::rejecting_everything());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let error = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap_err();

            match &error {
                Error::Middleware(inner) => match inner.downcast_ref::<GateError>() {
                    Some(GateError::Renewal(_)) => {}
                    other => panic!("unexpected gate error: {other:?}"),
                },
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 1);
        }
    }

    mod when_the_access_credential_is_expired_locally {
        use super::*;

        #[tokio::test]
        async fn cancels_the_request_before_dispatch_and_tears_down() {
            let f = fixture(Some(expired_session()), Renewal::Succeed).await;
            let terminal = Arc::new(NeverReached::default());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(terminal.clone())
                .build();

            let error = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap_err();

            match &error {
                Error::Middleware(inner) => {
                    assert!(matches!(
                        inner.downcast_ref::<GateError>(),
                        Some(GateError::PreflightExpired)
                    ));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(!terminal.reached.load(Ordering::Acquire));
            assert!(f.store.read().await.unwrap().is_none());
            assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 1);
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 0);
        }
    }

    mod when_the_server_rejects_the_credential {
        use super::*;

        #[tokio::test]
        async fn renews_once_and_replays_with_the_fresh_credential() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let switch = Arc::new(StatusSwitch::accepting(BEARER_FRESH_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 1);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 2);

            let held = f.store.read().await.unwrap().unwrap();
            assert_eq!(held.access_token().as_str(), FRESH_TOKEN);
        }

        #[tokio::test]
        async fn concurrent_rejections_share_a_single_renewal() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let switch = Arc::new(StatusSwitch::accepting(BEARER_FRESH_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let (a, b, c) = tokio::join!(
                client.get(format!("{BASE}/boards")).send(),
                client.get(format!("{BASE}/boards/7/comments")).send(),
                client.get(format!("{BASE}/members/me")).send(),
            );

            for resp in [a.unwrap(), b.unwrap(), c.unwrap()] {
                assert_eq!(resp.status(), StatusCode::OK);
            }
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 1);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 6);
        }

        #[tokio::test]
        async fn passes_a_replayed_rejection_through_unchanged() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let switch = Arc::new(StatusSwitch::rejecting_everything());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 1);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn does_not_renew_for_an_auth_free_path() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let switch = Arc::new(StatusSwitch::rejecting_everything());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let resp = client
                .get(format!("{BASE}/auth/sign-in"))
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 0);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn does_not_renew_for_a_cross_origin_request() {
            let f = fixture(Some(valid_session()), Renewal::Succeed).await;
            let switch = Arc::new(StatusSwitch::rejecting_everything());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let resp = client
                .get("https://elsewhere.example.com/boards")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(f.exchanges.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn a_null_renewal_credential_fails_fast_and_tears_down() {
            let store = Arc::new(InMemorySessionStore::new());
            let session = Session::new(
                AccessToken::from_static(STALE_TOKEN),
                Some(RenewalToken::from_static("null")),
                Some(UnixMillis(1_700_000_060_000)),
            );
            store.write(&session).await.unwrap();

            let config = Arc::new(GateConfig::new(BASE.parse().unwrap()));
            let navigator = Arc::new(RecordingNavigator::default());
            let notifications = Arc::new(NullNotificationStream);
            let terminator = SessionTerminator::new(
                store.clone(),
                notifications.clone(),
                navigator.clone(),
                "/auth/sign-in",
            );
            let renewer = Arc::new(RenewalClient::new(
                Client::new(),
                config.renew_url(),
                store.clone(),
            ));
            let coordinator = RenewalCoordinator::new(
                renewer,
                store.clone(),
                notifications,
                terminator.clone(),
            );
            let gate = SessionGate::new(config, store.clone(), coordinator, terminator)
                .with_clock(TestClock::new(NOW));

            let switch = Arc::new(StatusSwitch::rejecting_everything());
            let client = ClientBuilder::new(Client::default())
                .with(gate)
                .with_arc(switch.clone())
                .build();

            let error = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap_err();

            match &error {
                Error::Middleware(inner) => match inner.downcast_ref::<GateError>() {
                    Some(GateError::Renewal(renewal)) => {
                        assert!(matches!(**renewal, RenewalError::CredentialMissing));
                    }
                    other => panic!("unexpected gate error: {other:?}"),
                },
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(store.read().await.unwrap().is_none());
            assert_eq!(navigator.redirects.load(Ordering::SeqCst), 1);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn surfaces_the_renewal_error_when_the_renewal_fails() {
            let f = fixture(Some(valid_session()), Renewal::Fail).await;
            let switch = Arc::new(StatusSwitch::rejecting_everything());

            let client = ClientBuilder::new(Client::default())
                .with(f.gate)
                .with_arc(switch.clone())
                .build();

            let error = client
                .get(format!("{BASE}/boards"))
                .send()
                .await
                .unwrap_err();

            match &error {
                Error::Middleware(inner) => match inner.downcast_ref::<GateError>() {
                    Some(GateError::Renewal(renewal)) => {
                        assert!(matches!(**renewal, RenewalError::CredentialMissing));
                    }
                    other => panic!("unexpected gate error: {other:?}"),
                },
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(f.store.read().await.unwrap().is_none());
            assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 1);
            assert_eq!(switch.hits.load(Ordering::SeqCst), 1);
        }
    }

    mod same_origin_predicate {
        use super::*;

        fn predicate() -> SameOrigin {
            SameOrigin::new(BASE.parse().unwrap())
        }

        #[test]
        fn matches_when_the_request_shares_the_base_origin() {
            let request = Request::new(
                reqwest::Method::GET,
                format!("{BASE}/boards").parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(true, &request));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_another_host() {
            let request = Request::new(
                reqwest::Method::GET,
                "https://elsewhere.example.com/boards".parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &request));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_another_scheme() {
            let request = Request::new(
                reqwest::Method::GET,
                "http://board.example.com/boards".parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &request));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_another_port() {
            let request = Request::new(
                reqwest::Method::GET,
                "https://board.example.com:8443/boards".parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &request));
            assert!(result.is_none())
        }
    }

    mod auth_free_path_predicate {
        use super::*;

        fn predicate() -> AuthFreePath {
            AuthFreePath::new(Arc::new(GateConfig::new(BASE.parse().unwrap())))
        }

        #[test]
        fn matches_an_allow_listed_path() {
            let request = Request::new(
                reqwest::Method::GET,
                format!("{BASE}/auth/sign-in").parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(true, &request));
            assert!(result.is_none())
        }

        #[test]
        fn tolerates_a_trailing_slash() {
            let request = Request::new(
                reqwest::Method::GET,
                format!("{BASE}/auth/sign-in/").parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(true, &request));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_a_gated_path() {
            let request = Request::new(
                reqwest::Method::GET,
                format!("{BASE}/boards").parse().unwrap(),
            );
            let predicate = predicate();
            let result = dbg!(predicate.find_case(false, &request));
            assert!(result.is_none())
        }
    }
}
