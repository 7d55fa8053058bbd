//! The bundled agent running in a real Chromium against a local fixture page. Ignored by
//! default; run with `GOLDPATH_CDP_CONTRACT=1 cargo test -p capture-agent -- --ignored`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::response::Html;
use axum::routing::get;
use axum::Router;
use capture_agent::{capture_dom, AgentConfig, AgentMessage, CapturedAction};
use cdp_adapter::{event_bus, Cdp, CdpAdapter, CdpConfig, PageId, RawEvent};
use goldpath_core_types::{ActionType, WaitCondition};
use pretty_assertions::assert_eq;
use selector_synth::{DomView, SelectorSynth};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const FIXTURE: &str = r##"<!doctype html>
<html>
<head><title>checkout</title></head>
<body>
<header id="site-header">
  <nav aria-label="Primary"><a href="#home" class="nav-link">Home</a><a href="#deals" class="nav-link">Deals</a></nav>
</header>
<main class="Main_root__x7Y2k">
  <form data-cy="signup" onsubmit="return false">
    <input name="email" type="email">
    <button type="button" id="reveal" onclick="var slot = document.getElementById('slot'); var p = document.createElement('p'); p.setAttribute('data-testid', 'revealed'); slot.appendChild(document.createElement('br')); slot.appendChild(p);">Reveal</button>
    <button type="button" id="buy" class="btn btn-primary" onclick="var toast = document.createElement('div'); toast.setAttribute('data-testid', 'toast'); document.body.appendChild(toast); history.pushState({}, '', '/next');"><span class="label">Buy now</span></button>
  </form>
  <section id="slot"></section>
  <ul class="cards">
    <li class="card"><button class="btn">One</button></li>
    <li class="card"><button class="btn">Two</button></li>
  </ul>
  <div id=":r3:" class="css-9ab1cd"><span>generated</span><span>ids</span></div>
  <select name="country" role="listbox"><option value="fr">France</option></select>
</main>
</body>
</html>"##;

/// Agent selectors for every element in snapshot order; `null` outside `<body>`.
const AGENT_SELECTORS: &str = r#"(() => {
  const skip = new Set(['script', 'style', 'noscript', 'template']);
  return Array.from(document.querySelectorAll('*'))
    .filter((el) => !skip.has(el.tagName.toLowerCase()))
    .map((el) => (el !== document.body && document.body.contains(el) ? window.__goldpathAgent.generate(el) : null));
})()"#;

fn contract_enabled() -> bool {
    env::var("GOLDPATH_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

async fn serve_fixture() -> (String, JoinHandle<()>) {
    let router = Router::new().route("/", get(|| async { Html(FIXTURE) }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture server");
    let addr = listener.local_addr().expect("fixture address");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    (format!("http://{addr}/"), server)
}

async fn open_fixture() -> (Arc<CdpAdapter>, PageId, broadcast::Receiver<RawEvent>, JoinHandle<()>) {
    let (url, server) = serve_fixture().await;
    let (bus, rx) = event_bus(1024);
    let adapter = CdpAdapter::launch(CdpConfig::default(), bus)
        .await
        .expect("adapter launch");
    adapter
        .install(AgentConfig::default().page_install().expect("agent install"))
        .await
        .expect("install");
    let page = adapter.primary_page().await.expect("primary page");
    adapter
        .navigate(page, &url, Duration::from_secs(15))
        .await
        .expect("navigate to fixture");
    (adapter, page, rx, server)
}

/// Agent messages received until `done` holds or ten seconds pass.
async fn collect_until(
    rx: &mut broadcast::Receiver<RawEvent>,
    messages: &mut Vec<AgentMessage>,
    done: impl Fn(&[AgentMessage]) -> bool,
) {
    let binding = AgentConfig::default().binding;
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(messages) {
        let left = deadline.saturating_duration_since(Instant::now());
        match timeout(left, rx.recv()).await {
            Ok(Ok(RawEvent::BindingCalled { name, payload, .. })) if name == binding => {
                messages.push(AgentMessage::decode(&payload).expect("agent payload decodes"));
            }
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
}

fn actions(messages: &[AgentMessage]) -> Vec<&CapturedAction> {
    messages
        .iter()
        .filter_map(|message| match message {
            AgentMessage::Action(action) => Some(action),
            AgentMessage::Settled { .. } => None,
        })
        .collect()
}

fn settled(messages: &[AgentMessage], token: u64) -> Option<Option<&WaitCondition>> {
    messages.iter().find_map(|message| match message {
        AgentMessage::Settled {
            token: settled,
            wait_condition,
        } if *settled == token => Some(wait_condition.as_ref()),
        _ => None,
    })
}

fn action_of(messages: &[AgentMessage], action_type: ActionType) -> Option<&CapturedAction> {
    actions(messages)
        .into_iter()
        .find(|action| action.action_type == action_type)
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set GOLDPATH_CDP_CONTRACT=1"]
async fn agent_reports_gestures_and_their_settlement() {
    if !contract_enabled() {
        eprintln!("skipping agent contract test (GOLDPATH_CDP_CONTRACT not enabled)");
        return;
    }
    let (adapter, page, mut rx, server) = open_fixture().await;
    let mut messages = Vec::new();

    // Two fills inside the debounce window are one burst.
    let deadline = Duration::from_secs(5);
    adapter
        .fill(page, "input[name=email]", "ada", deadline)
        .await
        .expect("first fill");
    adapter
        .fill(page, "input[name=email]", "ada@example.test", deadline)
        .await
        .expect("second fill");
    sleep(Duration::from_millis(600)).await;

    adapter.click(page, "#reveal", deadline).await.expect("reveal click");
    collect_until(&mut rx, &mut messages, |seen| {
        action_of(seen, ActionType::Click).is_some_and(|click| settled(seen, click.token).is_some())
    })
    .await;

    let inputs: Vec<_> = actions(&messages)
        .into_iter()
        .filter(|action| action.action_type == ActionType::Input)
        .collect();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].selector.as_deref(), Some("input[name=\"email\"]"));
    assert_eq!(inputs[0].context["value"], "ada@example.test");

    let reveal = action_of(&messages, ActionType::Click).expect("reveal click captured");
    assert_eq!(reveal.selector.as_deref(), Some("#reveal"));
    assert_eq!(
        settled(&messages, reveal.token).flatten(),
        Some(&WaitCondition::Selector("[data-testid=\"revealed\"]".into()))
    );

    // The click lands on the inner span; the button is what gets recorded.
    messages.clear();
    adapter.click(page, "#buy .label", deadline).await.expect("buy click");
    collect_until(&mut rx, &mut messages, |seen| {
        let click = action_of(seen, ActionType::Click);
        action_of(seen, ActionType::Navigation).is_some()
            && click.is_some_and(|click| settled(seen, click.token).is_some())
    })
    .await;

    let buy = action_of(&messages, ActionType::Click).expect("buy click captured");
    assert_eq!(buy.selector.as_deref(), Some("#buy"));
    assert_eq!(buy.context["tagName"], "button");
    let navigated_to = match settled(&messages, buy.token).flatten() {
        Some(WaitCondition::Navigation(url)) => url.clone(),
        other => panic!("expected navigation wait, got {other:?}"),
    };
    assert!(navigated_to.ends_with("/next"), "{navigated_to}");

    let navigation = action_of(&messages, ActionType::Navigation).expect("spa navigation captured");
    assert_eq!(navigation.selector, None);
    assert_eq!(navigation.context["navigationMethod"], "pushState");
    assert!(navigation.context["to"]
        .as_str()
        .is_some_and(|to| to.ends_with("/next")));

    adapter.close().await.expect("close");
    server.abort();
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set GOLDPATH_CDP_CONTRACT=1"]
async fn agent_and_host_synthesizers_agree() {
    if !contract_enabled() {
        eprintln!("skipping agent contract test (GOLDPATH_CDP_CONTRACT not enabled)");
        return;
    }
    let (adapter, page, _rx, server) = open_fixture().await;

    let dom = capture_dom(adapter.as_ref(), page).await.expect("dom snapshot");
    let in_page: Vec<Value> = serde_json::from_value(
        adapter
            .evaluate_script(page, AGENT_SELECTORS)
            .await
            .expect("agent selectors"),
    )
    .expect("selector list");
    assert_eq!(in_page.len(), dom.len());

    let synth = SelectorSynth::new(AgentConfig::default().policy);
    let mut compared = 0;
    for node in dom.elements() {
        if !dom.is_within_body(node) {
            continue;
        }
        let host = synth.generate(&dom, node);
        assert_eq!(
            in_page[node].as_str(),
            Some(host.as_str()),
            "node {node} <{}>",
            dom.tag(node)
        );
        compared += 1;
    }
    assert!(compared > 10);

    adapter.close().await.expect("close");
    server.abort();
}
