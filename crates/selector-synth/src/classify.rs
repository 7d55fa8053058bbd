//! Heuristics for identifiers that are regenerated on every render.

use once_cell::sync::Lazy;
use regex::Regex;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{12}")
        .expect("uuid regex")
});
static HEX_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[0-9a-f]{8,}").expect("hex run regex"));
static REACT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:[a-zA-Z0-9]+:$|^:r[0-9a-z]*:").expect("react id regex"));
static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").expect("digit run regex"));
static FRAMEWORK_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(__|js-|react-|ember\d+|mui-\d+|headlessui-|radix-|rc-|yui_|ext-gen|gwt-uid|cdk-|mat-|ng-)")
        .expect("framework id regex")
});

static CSS_MODULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_{1,2}([a-zA-Z0-9-]{5,8})$").expect("css module regex"));
static GENERATED_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(css-|sc-|jsx-\d+|svelte-|ng-|emotion-|tw-[0-9a-f]{4,}|_)").expect("generated class regex")
});
static STATE_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(is-|has-)|^(active|focus|focused|hover|hovered|selected|open|opened|closed|disabled|checked|visible|hidden|show|loading|expanded|collapsed)$",
    )
    .expect("state class regex")
});

/// Whether `id` looks machine generated and therefore unsafe to anchor a selector on.
pub fn is_dynamic_id(id: &str) -> bool {
    let id = id.trim();
    if id.is_empty() || id.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return true;
    }
    if UUID_RE.is_match(id) || REACT_ID_RE.is_match(id) || FRAMEWORK_ID_RE.is_match(id) {
        return true;
    }
    if DIGIT_RUN_RE.is_match(id) {
        return true;
    }
    HEX_RUN_RE
        .find_iter(id)
        .any(|found| found.as_str().chars().any(|c| c.is_ascii_digit()))
}

/// Whether `class` is a build-time hash or a transient state marker.
pub fn is_unstable_class(class: &str) -> bool {
    if class.is_empty() {
        return true;
    }
    if GENERATED_CLASS_RE.is_match(class) || STATE_CLASS_RE.is_match(class) {
        return true;
    }
    // `Button_root__3kL9x` carries a hash suffix, `card__title` does not.
    let module_hash = CSS_MODULE_RE
        .captures(class)
        .and_then(|caps| caps.get(1))
        .is_some_and(|suffix| suffix.as_str().chars().any(|c| c.is_ascii_digit()));
    if module_hash {
        return true;
    }
    if DIGIT_RUN_RE.is_match(class) {
        return true;
    }
    looks_hashed(class)
}

// Short mixed letter/digit tokens such as `a1b2c3` or `xK93jd` carry no meaning.
fn looks_hashed(token: &str) -> bool {
    let alnum = token.chars().all(|c| c.is_ascii_alphanumeric());
    if !alnum || token.len() < 5 {
        return false;
    }
    let digits = token.chars().filter(char::is_ascii_digit).count();
    let upper = token.chars().filter(char::is_ascii_uppercase).count();
    let lower = token.chars().filter(char::is_ascii_lowercase).count();
    digits >= 2 || (digits >= 1 && upper >= 1 && lower >= 1)
}

/// Stable classes of an element, in source order.
pub fn stable_classes<'a>(classes: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    classes
        .into_iter()
        .filter(|class| !is_unstable_class(class))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_generated_ids() {
        for id in [
            "3f2b9c4e-8a1d-4c7e-9b3a-2d1e0f6a7b8c",
            "a3f9c2d1e8",
            ":r0:",
            ":R1a6:",
            "item-128734",
            "12345",
            "__next",
            "js-cart-toggle",
            "react-select-3-input",
            "ember482",
            "mui-12",
            "9lives",
        ] {
            assert!(is_dynamic_id(id), "{id} should be dynamic");
        }
    }

    #[test]
    fn keeps_meaningful_ids() {
        for id in ["checkout", "email", "main-nav", "submit-order", "searchBox", "step2"] {
            assert!(!is_dynamic_id(id), "{id} should be stable");
        }
    }

    #[test]
    fn filters_hash_and_state_classes() {
        let classes = [
            "btn",
            "btn-primary",
            "css-1x2y3z",
            "sc-bdVaJa",
            "jsx-2345",
            "Button_root__3kL9x",
            "is-active",
            "active",
            "a1b2c3",
            "nav-link",
            "card__title",
        ];
        assert_eq!(
            stable_classes(classes),
            vec!["btn", "btn-primary", "nav-link", "card__title"]
        );
    }
}
