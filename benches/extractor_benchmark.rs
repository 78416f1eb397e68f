//! Extraction throughput per strategy
//!
//! Each strategy runs over a synthetic page large enough that parsing, not
//! setup, dominates.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;
use url_monitor_lib::infrastructure::extraction::{CssExtractor, JsonExtractor, RegexExtractor};

fn html_page(items: usize) -> String {
    let rows: String = (0..items)
        .map(|i| format!("<li class=\"item\"><span class=\"price\">${i}.99</span> item {i}</li>"))
        .collect();
    format!("<html><body><h1 id=\"title\">Catalog</h1><ul>{rows}</ul></body></html>")
}

fn json_document(items: usize) -> String {
    let entries: Vec<serde_json::Value> = (0..items)
        .map(|i| serde_json::json!({ "id": i, "name": format!("item {i}"), "price": i as f64 + 0.99 }))
        .collect();
    serde_json::json!({ "meta": { "version": "2.4.1" }, "items": entries }).to_string()
}

fn bench_css(c: &mut Criterion) {
    let page = html_page(1_000);
    let first = CssExtractor::new("h1#title").unwrap();
    let all = CssExtractor::new(".price").unwrap();

    c.bench_function("css_single_element", |b| {
        b.iter(|| first.extract(black_box(page.as_bytes()), "text/html").unwrap());
    });
    c.bench_function("css_all_matches", |b| {
        b.iter(|| all.extract(black_box(page.as_bytes()), "text/html").unwrap());
    });
}

fn bench_regex(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let page = html_page(1_000);
    let extractor = RegexExtractor::new(r"\$(\d+)\.99").unwrap();

    c.bench_function("regex_capture_group", |b| {
        b.iter(|| {
            rt.block_on(extractor.extract(black_box(page.as_bytes()), "text/html"))
                .unwrap()
        });
    });
}

fn bench_json(c: &mut Criterion) {
    let document = json_document(1_000);
    let version = JsonExtractor::new("meta.version").unwrap();
    let names = JsonExtractor::new("items.#.name").unwrap();
    let filtered = JsonExtractor::new("items.#(price>500).name").unwrap();

    c.bench_function("json_nested_key", |b| {
        b.iter(|| version.extract(black_box(document.as_bytes()), "application/json").unwrap());
    });
    c.bench_function("json_each_element", |b| {
        b.iter(|| names.extract(black_box(document.as_bytes()), "application/json").unwrap());
    });
    c.bench_function("json_query_filter", |b| {
        b.iter(|| filtered.extract(black_box(document.as_bytes()), "application/json").unwrap());
    });
}

criterion_group!(benches, bench_css, bench_regex, bench_json);
criterion_main!(benches);
