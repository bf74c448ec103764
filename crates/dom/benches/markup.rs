use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dom::Document;

fn feed(items: usize) -> String {
    (0..items)
        .map(|i| format!("<li class=\"item\" data-i=\"{i}\"><span>{{{{title}}}}</span> &amp; more</li>"))
        .collect()
}

fn bench_markup(c: &mut Criterion) {
    let html = format!("<ul id=\"feed\">{}</ul>", feed(200));

    c.bench_function("parse_200_items", |b| {
        b.iter(|| Document::from_body_html(black_box(&html)).unwrap())
    });

    let doc = Document::from_body_html(&html).unwrap();
    c.bench_function("serialize_200_items", |b| {
        b.iter(|| doc.inner_html(black_box(doc.body())).unwrap())
    });

    c.bench_function("query_selector_all", |b| {
        b.iter(|| {
            doc.query_selector_all(doc.document_id(), black_box("#feed > li.item span"))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_markup);
criterion_main!(benches);
