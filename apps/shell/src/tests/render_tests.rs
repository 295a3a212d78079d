use super::*;

#[test]
fn document_lists_lines_then_links() {
    let doc = Document::new("Main Page")
        .line("hello")
        .link("log in", "#login");
    assert_eq!(doc.to_string(), "== Main Page ==\nhello\n  [log in] #login\n");
}

#[test]
fn renderer_prefixes_mount_target() {
    let renderer = TextRenderer::new(Vec::new());
    renderer.render(Document::new("A"), "root");
    renderer.render(Document::new("B").line("x"), "side");

    let out = renderer.out.into_inner().expect("not poisoned");
    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "\n[root] == A ==\n\n[side] == B ==\nx\n"
    );
}
