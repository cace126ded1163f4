//! Parse an HTML page and list its links.
//!
//! Run with: `cargo run --example find_links`
#![allow(clippy::expect_used)]

use domoxide::{Document, Node};

fn main() {
    let html = r##"<!DOCTYPE html>
<html>
<head><title>Links</title></head>
<body>
  <nav>
    <a href="https://www.google.com">Search</a>
    <a href="/about">About</a>
  </nav>
  <p>No link here, but <a href="#top">one back to the top</a>.</p>
</body>
</html>"##;

    let mut doc = Document::parse_html(html).expect("failed to parse HTML");
    {
        let links = doc.find_nodes("//a[@href]").expect("query failed");
        println!("Found {} link(s):", links.len());
        for link in &links {
            let Node::Element(a) = link else { continue };
            let href = a.attribute_value("href").unwrap_or_default();
            println!("  {:<28} {}", href, a.text_content().trim());
        }

        let nav = doc.find_nodes("//nav").expect("query failed");
        if let Some(nav) = nav.first() {
            println!("\nThe nav block, formatted:\n{}", nav.to_string_with(1, false));
        }
    }
    doc.free();
}
