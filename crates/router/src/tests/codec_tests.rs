use super::*;

fn state(view: &str, params: &[(&str, &str)]) -> NavigationState {
    NavigationState {
        view: view.to_string(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[test]
fn decodes_bare_view() {
    assert_eq!(decode("#view"), state("view", &[]));
}

#[test]
fn decodes_marker_only_as_default_view() {
    assert_eq!(decode("#"), state("", &[]));
    assert_eq!(decode(""), state("", &[]));
}

#[test]
fn decodes_query_with_percent_escapes() {
    assert_eq!(
        decode("#a?x=1&y=hello%20world"),
        state("a", &[("x", "1"), ("y", "hello world")])
    );
}

#[test]
fn fragment_without_marker_is_taken_whole() {
    assert_eq!(decode("login?email=a%40b.c"), state("login", &[("email", "a@b.c")]));
}

#[test]
fn pair_without_equals_maps_to_empty_value() {
    assert_eq!(decode("#v?flag&x=1"), state("v", &[("flag", ""), ("x", "1")]));
}

#[test]
fn empty_segments_are_skipped() {
    assert_eq!(decode("#v?&x=1&&"), state("v", &[("x", "1")]));
    assert_eq!(decode("#v?"), state("v", &[]));
}

#[test]
fn value_keeps_everything_after_first_equals() {
    assert_eq!(decode("#v?x=a=b"), state("v", &[("x", "a=b")]));
}

#[test]
fn keys_are_not_unescaped() {
    assert_eq!(decode("#v?a%20b=1"), state("v", &[("a%20b", "1")]));
}

#[test]
fn repeated_key_keeps_last_value() {
    assert_eq!(decode("#v?x=1&x=2"), state("v", &[("x", "2")]));
}

#[test]
fn malformed_escapes_stay_literal() {
    assert_eq!(decode("#v?x=100%&y=%zz"), state("v", &[("x", "100%"), ("y", "%zz")]));
}

#[test]
fn invalid_utf8_decodes_lossily() {
    assert_eq!(decode("#v?x=%FF"), state("v", &[("x", "\u{FFFD}")]));
}

#[test]
fn encodes_bare_view_and_default_view() {
    assert_eq!(encode(&state("view", &[])), "#view");
    assert_eq!(encode(&state("", &[])), "#");
}

#[test]
fn encodes_values_like_encode_uri_component() {
    let encoded = encode(&state(
        "login_confirm",
        &[("email", "a.b+c@example.com"), ("note", "it's (ok) ~*!_-")],
    ));
    assert_eq!(
        encoded,
        "#login_confirm?email=a.b%2Bc%40example.com&note=it's%20(ok)%20~*!_-"
    );
}

#[test]
fn display_matches_encode() {
    let s = NavigationState::new("manage_users").with_param("page", "2");
    assert_eq!(s.to_string(), "#manage_users?page=2");
}

#[test]
fn round_trips_states_without_reserved_key_characters() {
    let cases = [
        state("", &[]),
        state("", &[("x", "1")]),
        state("a", &[("", "empty key")]),
        state("users", &[("q", "50% off & more?"), ("tag", "#hash=yes")]),
        state("unicode", &[("name", "Zoë 東京"), ("blank", "")]),
        state("a/b.c", &[("k1", "v1"), ("k2", "v2"), ("k3", "a=b&c")]),
    ];
    for case in cases {
        assert_eq!(decode(&encode(&case)), case, "fragment {}", encode(&case));
    }
}
