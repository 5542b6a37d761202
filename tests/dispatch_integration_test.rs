use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use addon_core::http::{Request, Response, ToolSource};
use addon_core::{
    AddonOverride, AddonSpec, Annotator, BoxError, Cipher, CipherFactory, ControlAction, Dispatcher,
    EngineConfig, Highlight, Registry, ScopePrefixes,
};
use http::{Method, StatusCode};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber that records every event at debug level and above.
fn with_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, logs.text())
}

fn get(url: &str) -> Request {
    Request::from_url(Method::GET, url).unwrap()
}

fn counting(name: &str, counter: &Arc<AtomicUsize>) -> AddonSpec {
    let counter = Arc::clone(counter);
    AddonSpec::named(name).on_request(move |req, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(req.clone().into())
    })
}

fn expect_continue<T: std::fmt::Debug>(action: ControlAction<T>) -> T {
    match action {
        ControlAction::Continue(message) => message,
        other => panic!("expected Continue, got {:?}", other),
    }
}

// ============================================================================
// Ordering and control actions
// ============================================================================

#[test]
fn later_addon_sees_earlier_mutation() {
    let observed = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&observed);

    let registry = Registry::load(vec![
        AddonSpec::named("set-x").on_request(|req, _| Ok(req.with_header("X", "from-a").into())),
        AddonSpec::named("read-x")
            .request_filter(r#"(has-header "X")"#)
            .on_request(move |req, _| {
                *seen.lock().unwrap() = req.header("X").map(str::to_string);
                Ok(req.clone().into())
            }),
    ]);

    Dispatcher::new(registry).dispatch_request(get("https://example.com/"));
    assert_eq!(observed.lock().unwrap().as_deref(), Some("from-a"));
}

#[test]
fn drop_logout_before_rewrite_host() {
    let rewrites = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rewrites);

    let registry = Registry::load(vec![
        AddonSpec::named("drop-logout")
            .request_filter(r#"(path-contains "/logout")"#)
            .on_request(|_, _| Ok(ControlAction::Drop)),
        AddonSpec::named("rewrite-host").on_request(move |req, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(req.with_host("ivision.com")?.into())
        }),
    ]);
    let dispatcher = Dispatcher::new(registry);

    let logout = get("https://not-ivision.com/logout").with_header("Host", "not-ivision.com");
    assert_eq!(dispatcher.dispatch_request(logout), ControlAction::Drop);
    assert_eq!(rewrites.load(Ordering::SeqCst), 0);

    let home = get("https://not-ivision.com/home").with_header("Host", "not-ivision.com");
    let out = expect_continue(dispatcher.dispatch_request(home));
    assert_eq!(out.header("Host"), Some("ivision.com"));
    assert_eq!(out.host(), Some("ivision.com"));
    assert_eq!(rewrites.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_stops_every_later_addon() {
    let later = Arc::new(AtomicUsize::new(0));
    let registry = Registry::load(vec![
        AddonSpec::named("dropper").on_request(|_, _| Ok(ControlAction::Drop)),
        counting("after-1", &later),
        counting("after-2", &later).request_filter("true"),
    ]);

    let action = Dispatcher::new(registry).dispatch_request(get("https://example.com/"));
    assert_eq!(action, ControlAction::Drop);
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[test]
fn intercept_freezes_the_message() {
    let later = Arc::new(AtomicUsize::new(0));
    let registry = Registry::load(vec![
        AddonSpec::named("mark").on_request(|req, _| Ok(req.with_header("X-Marked", "1").into())),
        AddonSpec::named("hold").on_request(|req, _| {
            Ok(ControlAction::Intercept(req.with_header("X-Held", "1")))
        }),
        counting("after", &later),
    ]);

    match Dispatcher::new(registry).dispatch_request(get("https://example.com/")) {
        ControlAction::Intercept(held) => {
            assert_eq!(held.header("X-Marked"), Some("1"));
            assert_eq!(held.header("X-Held"), Some("1"));
        }
        other => panic!("expected Intercept, got {:?}", other),
    }
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[test]
fn noop_addon_changes_nothing() {
    let tag = || AddonSpec::named("tag").on_request(|req, _| Ok(req.with_added_header("X-Tag", "t").into()));
    let noop = || AddonSpec::named("noop").on_request(|req, _| Ok(req.clone().into()));

    let req = get("https://example.com/a?b=c")
        .with_header("Cookie", "s=1")
        .with_body("payload");

    let without = Dispatcher::new(Registry::load(vec![tag()])).dispatch_request(req.clone());
    let with = Dispatcher::new(Registry::load(vec![noop(), tag(), noop()])).dispatch_request(req);
    assert_eq!(with, without);
}

#[test]
fn original_message_is_not_mutated() {
    let registry = Registry::load(vec![
        AddonSpec::new().on_request(|req, _| Ok(req.with_body("changed").with_header("X", "1").into())),
    ]);
    let original = get("https://example.com/").with_body("original");
    let out = expect_continue(Dispatcher::new(registry).dispatch_request(original.clone()));

    assert_eq!(&original.body()[..], b"original");
    assert!(original.header("X").is_none());
    assert_eq!(&out.body()[..], b"changed");
}

#[test]
fn attachments_hand_off_between_addons() {
    let registry = Registry::load(vec![
        AddonSpec::named("tagger").on_request(|req, _| Ok(req.with_attachment("user", "alice").into())),
        AddonSpec::named("reader")
            .request_filter(r#"(has-attachment "user")"#)
            .on_request(|req, _| {
                let user = req.attachment("user").unwrap_or("nobody").to_string();
                Ok(req.with_header("X-User", user).into())
            }),
    ]);
    let out = expect_continue(Dispatcher::new(registry).dispatch_request(get("https://example.com/")));
    assert_eq!(out.header("X-User"), Some("alice"));
}

// ============================================================================
// Filters against requests and responses
// ============================================================================

#[test]
fn scope_and_path_filter() {
    let registry = Registry::load(vec![AddonSpec::named("api")
        .request_filter(r#"(and (in-scope) (path-contains "api"))"#)
        .on_request(|req, _| Ok(req.with_header("X-Api", "1").into()))]);
    let dispatcher =
        Dispatcher::new(registry).with_scope(ScopePrefixes::new(["https://target.example.com/"]));

    let api = expect_continue(dispatcher.dispatch_request(get("https://target.example.com/api/users")));
    assert_eq!(api.header("X-Api"), Some("1"));

    let asset =
        expect_continue(dispatcher.dispatch_request(get("https://target.example.com/static/app.js")));
    assert!(asset.header("X-Api").is_none());

    let out_of_scope = expect_continue(dispatcher.dispatch_request(get("https://other.example.com/api")));
    assert!(out_of_scope.header("X-Api").is_none());
}

#[test]
fn response_header_matches_json_content_type() {
    let registry = Registry::load(vec![AddonSpec::named("json-only")
        .response_filter(r#"(header-matches "Content-Type" r"application/json")"#)
        .on_response(|res, _| Ok(res.with_header("X-Json", "1").into()))]);
    let dispatcher = Dispatcher::new(registry);
    let req = Arc::new(get("https://example.com/api"));

    let json = Response::new(Arc::clone(&req), StatusCode::OK)
        .with_header("Content-Type", "application/json; charset=utf-8");
    let out = expect_continue(dispatcher.dispatch_response(json));
    assert_eq!(out.header("X-Json"), Some("1"));

    let html = Response::new(req, StatusCode::OK).with_header("Content-Type", "text/html");
    let out = expect_continue(dispatcher.dispatch_response(html));
    assert!(out.header("X-Json").is_none());
}

#[test]
fn addon_without_request_callback_is_skipped_unevaluated() {
    let registry = Registry::load(vec![AddonSpec::named("responses-only")
        .request_filter("(no-such-predicate)")
        .response_filter("(status-code-eq 200)")
        .on_response(|res, _| Ok(res.clone().into()))]);
    let dispatcher = Dispatcher::new(registry);

    let (action, logs) = with_logs(|| dispatcher.dispatch_request(get("https://example.com/")));
    assert!(action.is_continue());
    assert!(!logs.contains("filter failed"), "{}", logs);
    assert!(!logs.contains("no-such-predicate"), "{}", logs);
}

#[test]
fn unknown_predicate_never_matches_and_others_still_run() {
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = Registry::load(vec![
        counting("typo", &hits).request_filter("(in-scpoe)"),
        AddonSpec::named("fine").on_request(|req, _| Ok(req.with_header("X-Fine", "1").into())),
    ]);
    let dispatcher = Dispatcher::new(registry);

    let (action, logs) = with_logs(|| dispatcher.dispatch_request(get("https://example.com/")));
    let out = expect_continue(action);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(out.header("X-Fine"), Some("1"));
    assert!(logs.contains("unknown predicate `in-scpoe`"), "{}", logs);
    assert!(logs.contains("typo"), "{}", logs);
}

#[test]
fn response_only_predicate_on_request_counts_as_no_match() {
    let hits = Arc::new(AtomicUsize::new(0));
    let registry = Registry::load(vec![counting("status", &hits).request_filter("(status-code-eq 200)")]);
    let (_, logs) = with_logs(|| Dispatcher::new(registry).dispatch_request(get("https://example.com/")));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(logs.contains("cannot be applied to a request"), "{}", logs);
}

#[test]
fn response_filters_use_initiating_request_url() {
    let registry = Registry::load(vec![AddonSpec::named("admin-errors")
        .response_filter(r#"(and (path-matches r"^/admin") (status-code-in 500 599) (method-eq "POST"))"#)
        .on_response(|res, _| Ok(res.with_reason("Hidden").into()))]);
    let dispatcher = Dispatcher::new(registry);

    let req = Request::from_url(Method::POST, "https://example.com/admin/save").unwrap();
    let out = expect_continue(dispatcher.dispatch_response(Response::new(req, StatusCode::BAD_GATEWAY)));
    assert_eq!(out.reason(), "Hidden");
}

// ============================================================================
// Failure policy
// ============================================================================

#[test]
fn callback_error_is_logged_and_pipeline_continues() {
    let registry = Registry::load(vec![
        AddonSpec::named("before").on_request(|req, _| Ok(req.with_header("X-Before", "1").into())),
        AddonSpec::named("faulty").on_request(|req, _| {
            let _half_done = req.with_header("X-Faulty", "1");
            let n: u32 = "not a number".parse()?;
            Ok(req.with_header("X-N", n.to_string()).into())
        }),
        AddonSpec::named("after").on_request(|req, _| Ok(req.with_header("X-After", "1").into())),
    ]);
    let dispatcher = Dispatcher::new(registry);

    let req = get("https://example.com/").with_message_id(42);
    let (action, logs) = with_logs(|| dispatcher.dispatch_request(req));
    let out = expect_continue(action);

    assert_eq!(out.header("X-Before"), Some("1"));
    assert_eq!(out.header("X-After"), Some("1"));
    assert!(out.header("X-Faulty").is_none());
    assert!(out.header("X-N").is_none());
    assert!(logs.contains("addon callback failed"), "{}", logs);
    assert!(logs.contains("faulty"), "{}", logs);
    assert!(logs.contains("message_id=42"), "{}", logs);
}

#[test]
fn callback_panic_is_contained() {
    let registry = Registry::load(vec![
        AddonSpec::named("panicky").on_request(|_, _| panic!("addon bug")),
        AddonSpec::named("after").on_request(|req, _| Ok(req.with_header("X-After", "1").into())),
    ]);
    let dispatcher = Dispatcher::new(registry);

    let (action, logs) = with_logs(|| dispatcher.dispatch_request(get("https://example.com/")));
    let out = expect_continue(action);
    assert_eq!(out.header("X-After"), Some("1"));
    assert!(logs.contains("panicked: addon bug"), "{}", logs);

    // The dispatcher stays usable after a panic.
    assert!(dispatcher.dispatch_request(get("https://example.com/")).is_continue());
}

#[test]
fn malformed_filter_rejects_only_that_addon() {
    let (registry, logs) = with_logs(|| {
        Registry::load(vec![
            AddonSpec::named("good-1").on_request(|req, _| Ok(req.with_added_header("X-Ran", "1").into())),
            AddonSpec::named("bad")
                .request_filter(r#"(and (in-scope) (path-contains "api")"#)
                .on_request(|_, _| Ok(ControlAction::Drop)),
            AddonSpec::named("good-2").on_request(|req, _| Ok(req.with_added_header("X-Ran", "2").into())),
        ])
    });

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.rejected().len(), 1);
    assert_eq!(registry.rejected()[0].addon().to_string(), "bad");
    assert!(logs.contains("addon rejected"), "{}", logs);

    let out = expect_continue(Dispatcher::new(registry).dispatch_request(get("https://example.com/api")));
    assert_eq!(out.headers().get_all("X-Ran").collect::<Vec<_>>(), vec!["1", "2"]);
}

// ============================================================================
// Registry swap and lifecycle
// ============================================================================

#[test]
fn reload_during_dispatch_finishes_on_old_registry() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let old = {
        let (entered, release) = (Arc::clone(&entered), Arc::clone(&release));
        let cleanups = Arc::clone(&cleanups);
        Registry::load(vec![
            AddonSpec::named("slow")
                .on_request(move |req, _| {
                    entered.wait();
                    release.wait();
                    Ok(req.with_header("X-Gen", "old").into())
                })
                .on_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            AddonSpec::named("second-old").on_request(|req, _| Ok(req.with_header("X-Second", "1").into())),
        ])
    };
    let dispatcher = Arc::new(Dispatcher::new(old));

    let in_flight = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.dispatch_request(get("https://example.com/")))
    };

    entered.wait();
    dispatcher.reload(vec![
        AddonSpec::named("fresh").on_request(|req, _| Ok(req.with_header("X-Gen", "new").into()))
    ]);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0, "old registry still in use");
    release.wait();

    let out = expect_continue(in_flight.join().unwrap());
    assert_eq!(out.header("X-Gen"), Some("old"));
    assert_eq!(out.header("X-Second"), Some("1"));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    let next = expect_continue(dispatcher.dispatch_request(get("https://example.com/")));
    assert_eq!(next.header("X-Gen"), Some("new"));
    assert!(next.header("X-Second").is_none());

    drop(dispatcher);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn replace_returns_previous_registry() {
    let dispatcher = Dispatcher::new(Registry::load(vec![AddonSpec::named("one")]));
    let previous = dispatcher.replace(Registry::load(vec![AddonSpec::named("two")]));
    assert_eq!(previous.iter().next().map(|a| a.id().to_string()).as_deref(), Some("one"));
    assert!(dispatcher.registry().generation() > previous.generation());
}

#[test]
fn concurrent_dispatches_keep_per_event_order() {
    let registry = Registry::load(vec![
        AddonSpec::named("a").on_request(|req, _| Ok(req.with_added_header("X-Order", "a").into())),
        AddonSpec::named("b").on_request(|req, _| Ok(req.with_added_header("X-Order", "b").into())),
        AddonSpec::named("c")
            .request_filter(r#"(has-query-param "drop")"#)
            .on_request(|_, _| Ok(ControlAction::Drop)),
    ]);
    let dispatcher = Arc::new(Dispatcher::new(registry));

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for i in 0..50 {
                    let url = if i % 5 == 0 {
                        format!("https://example.com/{}?drop=1", t)
                    } else {
                        format!("https://example.com/{}", t)
                    };
                    let req = get(&url).with_message_id(t * 1000 + i);
                    match dispatcher.dispatch_request(req) {
                        ControlAction::Continue(out) => {
                            assert_ne!(i % 5, 0);
                            assert_eq!(out.message_id(), t * 1000 + i);
                            assert_eq!(out.headers().get_all("X-Order").collect::<Vec<_>>(), vec!["a", "b"]);
                        }
                        ControlAction::Drop => assert_eq!(i % 5, 0),
                        ControlAction::Intercept(_) => panic!("unexpected intercept"),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

// ============================================================================
// Configuration and host services
// ============================================================================

#[test]
fn config_disables_and_refilters_addons() {
    let config = EngineConfig::from_json(
        r#"{
            "options": { "proxy_only": true },
            "addons": [
                { "id": "noisy", "enabled": false },
                { "id": "addon#1", "request_filter": "(path-contains \"/only\")" }
            ]
        }"#,
    )
    .unwrap();
    assert!(config.validate().is_ok());

    let dispatcher = Dispatcher::from_config(
        vec![
            AddonSpec::named("noisy").on_request(|req, _| Ok(req.with_header("X-Noisy", "1").into())),
            AddonSpec::new().on_request(|req, _| Ok(req.with_header("X-Anon", "1").into())),
        ],
        &config,
    );

    let out = expect_continue(dispatcher.dispatch_request(get("https://example.com/only/here")));
    assert!(out.header("X-Noisy").is_none());
    assert_eq!(out.header("X-Anon"), Some("1"));

    let elsewhere = expect_continue(dispatcher.dispatch_request(get("https://example.com/else")));
    assert!(elsewhere.header("X-Anon").is_none());

    let repeated = get("https://example.com/only").with_tool_source(ToolSource::Repeater);
    let out = expect_continue(dispatcher.dispatch_request(repeated));
    assert!(out.header("X-Anon").is_none());
}

#[test]
fn override_for_unknown_addon_is_logged() {
    let overrides = vec![
        AddonOverride::disable("rewrite-hsot"),
        AddonOverride::disable("noisy"),
    ];
    let (registry, logs) = with_logs(|| {
        Registry::load_with(
            vec![AddonSpec::named("noisy"), AddonSpec::named("rewrite-host")],
            &overrides,
        )
    });

    assert_eq!(registry.len(), 1);
    assert!(logs.contains("configuration override matches no addon"), "{}", logs);
    assert!(logs.contains("rewrite-hsot"), "{}", logs);
    assert_eq!(logs.matches("matches no addon").count(), 1, "{}", logs);
}

#[derive(Clone, Default)]
struct RecordingAnnotator {
    highlights: Arc<Mutex<Vec<(u64, Highlight)>>>,
}

impl Annotator for RecordingAnnotator {
    fn set_highlight(&self, message_id: u64, highlight: Highlight) {
        self.highlights.lock().unwrap().push((message_id, highlight));
    }

    fn set_notes(&self, _message_id: u64, _notes: &str) {}
}

struct XorCipher {
    key: Vec<u8>,
}

impl Cipher for XorCipher {
    fn set_key(&mut self, key: &[u8]) -> Result<(), BoxError> {
        if key.is_empty() {
            return Err("empty key".into());
        }
        self.key = key.to_vec();
        Ok(())
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(data
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(d, k)| d ^ k)
            .collect())
    }

    fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        self.encrypt(data)
    }
}

struct XorFactory;

impl CipherFactory for XorFactory {
    fn new_cipher(&self, spec: &str) -> Result<Box<dyn Cipher>, BoxError> {
        match spec {
            "XOR" => Ok(Box::new(XorCipher { key: Vec::new() })),
            other => Err(format!("unsupported cipher {}", other).into()),
        }
    }
}

#[test]
fn addons_reach_host_services_through_context() {
    let annotator = RecordingAnnotator::default();
    let registry = Registry::load(vec![AddonSpec::named("decrypt-body")
        .request_filter(r#"(has-header "X-Encrypted")"#)
        .on_request(|req, ctx| {
            ctx.highlight(Highlight::Yellow);
            let mut cipher = ctx.new_cipher("XOR")?;
            cipher.set_key(b"k")?;
            let plain = cipher.decrypt(req.body())?;
            Ok(req.without_header("X-Encrypted").with_body(plain).into())
        })]);
    let dispatcher = Dispatcher::new(registry)
        .with_annotator(annotator.clone())
        .with_crypto(XorFactory);

    let secret: Vec<u8> = b"hello".iter().map(|b| b ^ b'k').collect();
    let req = get("https://example.com/")
        .with_header("X-Encrypted", "1")
        .with_body(secret)
        .with_message_id(5);

    let out = expect_continue(dispatcher.dispatch_request(req));
    assert_eq!(&out.body()[..], b"hello");
    assert!(out.header("X-Encrypted").is_none());
    assert_eq!(*annotator.highlights.lock().unwrap(), vec![(5, Highlight::Yellow)]);
}
