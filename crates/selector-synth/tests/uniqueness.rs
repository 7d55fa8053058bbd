use pretty_assertions::assert_eq;
use selector_synth::{is_dynamic_id, resolve, DomView, SelectorSynth, StaticDom, Tier};

/// A storefront page with repeated cards, generated ids, hashed classes and nested forms.
fn storefront() -> StaticDom {
    let mut dom = StaticDom::new();
    let html = dom.append(None, "html", &[("lang", "en")]);
    let head = dom.append(Some(html), "head", &[]);
    dom.append(Some(head), "title", &[]);
    let body = dom.append(Some(html), "body", &[("class", "theme-light")]);

    let header = dom.append(Some(body), "header", &[("id", "site-header")]);
    let nav = dom.append(Some(header), "nav", &[("aria-label", "Primary")]);
    for label in ["Home", "Deals", "Account"] {
        let link = dom.append(Some(nav), "a", &[("class", "nav-link is-active")]);
        dom.set_text(link, label);
    }
    dom.append(
        Some(header),
        "button",
        &[("id", ":r3:"), ("class", "css-9ab1cd")],
    );

    let main = dom.append(Some(body), "main", &[("class", "Main_root__x7Y2k")]);
    for index in 0..4 {
        let card = dom.append(
            Some(main),
            "article",
            &[
                ("class", "card product"),
                ("id", &format!("product-{}", 48213 + index)),
            ],
        );
        dom.append(Some(card), "h3", &[("class", "card__title")]);
        dom.append(Some(card), "span", &[("class", "price")]);
        let actions = dom.append(Some(card), "div", &[("class", "card__actions")]);
        dom.append(Some(actions), "button", &[("class", "btn btn-primary")]);
        dom.append(Some(actions), "button", &[("class", "btn")]);
    }
    dom.append(
        Some(main),
        "div",
        &[("data-testid", "promo-banner"), ("class", "sc-bdVaJa")],
    );

    let form = dom.append(Some(body), "form", &[("data-cy", "newsletter")]);
    dom.append(
        Some(form),
        "input",
        &[("type", "email"), ("name", "email"), ("id", "3f2b9c4e-8a1d-4c7e-9b3a-2d1e0f6a7b8c")],
    );
    for value in ["weekly", "monthly"] {
        dom.append(
            Some(form),
            "input",
            &[("type", "radio"), ("name", "cadence"), ("value", value)],
        );
    }
    dom.append(Some(form), "select", &[("name", "country")]);
    dom.append(Some(form), "button", &[("type", "submit")]);
    dom.append(Some(form), "button", &[("type", "reset")]);

    let footer = dom.append(Some(body), "footer", &[]);
    let columns = dom.append(Some(footer), "div", &[]);
    for _ in 0..3 {
        let column = dom.append(Some(columns), "div", &[]);
        dom.append(Some(column), "a", &[("href", "#")]);
        dom.append(Some(column), "a", &[("href", "#")]);
    }
    dom.append(Some(body), "div", &[("id", "my.weird:id")]);
    dom.append(Some(body), "div", &[("id", "dup")]);
    dom.append(Some(body), "div", &[("id", "dup")]);
    dom
}

#[test]
fn every_body_element_resolves_to_itself() {
    let dom = storefront();
    let synth = SelectorSynth::default();
    let mut checked = 0;
    for node in dom.elements() {
        if dom.tag(node) != "body" && !dom.is_within_body(node) {
            continue;
        }
        let selector = synth.generate(&dom, node);
        let resolved = resolve(&dom, &selector).unwrap();
        assert_eq!(resolved, vec![node], "selector {selector} for node {node}");
        checked += 1;
    }
    assert!(checked > 40);
}

#[test]
fn generated_ids_never_become_id_selectors() {
    let dom = storefront();
    let synth = SelectorSynth::default();
    for node in dom.elements() {
        let Some(id) = dom.id(node) else { continue };
        if !is_dynamic_id(id) {
            continue;
        }
        let synthesis = synth.synthesize(&dom, node);
        assert!(
            !synthesis.selector.contains(&format!("#{id}")),
            "dynamic id {id} leaked into {}",
            synthesis.selector
        );
        assert_ne!(synthesis.tier, Tier::StableId);
    }
}

#[test]
fn cascade_prefers_semantic_tiers() {
    let dom = storefront();
    let synth = SelectorSynth::default();
    let find = |tag: &str, attr: &str, value: &str| {
        dom.elements()
            .into_iter()
            .find(|n| dom.tag(*n) == tag && dom.attr(*n, attr) == Some(value))
            .unwrap()
    };

    let banner = find("div", "data-testid", "promo-banner");
    assert_eq!(synth.generate(&dom, banner), "[data-testid=\"promo-banner\"]");

    let header = find("header", "id", "site-header");
    assert_eq!(synth.generate(&dom, header), "#site-header");

    let nav = find("nav", "aria-label", "Primary");
    assert_eq!(synth.generate(&dom, nav), "nav[aria-label=\"Primary\"]");

    let monthly = find("input", "value", "monthly");
    assert_eq!(
        synth.generate(&dom, monthly),
        "input[name=\"cadence\"][value=\"monthly\"]"
    );

    let weird = find("div", "id", "my.weird:id");
    assert_eq!(synth.generate(&dom, weird), "#my\\.weird\\:id");
}

#[test]
fn snapshot_json_feeds_the_same_cascade() {
    let raw = r#"{
        "url": "https://shop.test/cart",
        "nodes": [
            {"tag": "html", "parent": null},
            {"tag": "body", "parent": 0},
            {"tag": "div", "attrs": {"data-test": "cart"}, "parent": 1},
            {"tag": "button", "attrs": {"class": "btn jsx-1234"}, "text": "Checkout", "parent": 2},
            {"tag": "button", "attrs": {"class": "btn"}, "text": "Clear", "parent": 2}
        ]
    }"#;
    let dom = StaticDom::from_json(raw).unwrap();
    let synth = SelectorSynth::default();
    let selector = synth.generate(&dom, 3);
    assert_eq!(selector, "[data-test=\"cart\"] > button.btn:nth-of-type(1)");
    assert_eq!(resolve(&dom, &selector).unwrap(), vec![3]);
}
