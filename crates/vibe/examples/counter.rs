//! Counter example - render a component into a page that is still loading

use std::time::Duration;

use dom::{Document, ReadyState};
use serde_json::json;
use vibe::{handler, ComponentSpec, Component, MountOptions, Position, Timing, Vibe, VibeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut document = Document::with_ready_state(ReadyState::Loading);
    let body = document.body();
    document.set_inner_html(body, r#"<header><h1>Counter</h1></header>"#)?;

    let vibe = Vibe::with_config(document, VibeConfig::default());

    let mut event_rx = vibe.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if !matches!(event, vibe::VibeEvent::Mutation(_)) {
                println!("📢 Event: {:?}", event);
            }
        }
    });

    // #app does not exist yet; the mount waits for it
    let counter = vibe.render(
        Component::factory(|| {
            ComponentSpec::new()
                .template("<p>Count: {{count}}</p><button>+1</button>")
                .class_name("counter")
                .state(json!({"count": 0}))
                .init(|h| println!("✅ init: {}", h.outer_html().unwrap_or_default()))
        }),
        MountOptions::default()
            .to("#app")
            .vdata("count", 0)
            .on(
                "click",
                handler(|event| {
                    let h = event.current_target();
                    let next = h.get_state("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                    h.update_state("count", json!(next));
                    if let Err(err) = h.set("count", next) {
                        eprintln!("render failed: {err}");
                    }
                }),
            ),
    )?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    vibe.select("header")?
        .ok_or("header missing")?
        .after(r#"<section id="app"></section>"#)?;
    vibe.finish_loading();
    counter.mounted().await?;

    for _ in 0..3 {
        counter.trigger("click")?;
    }
    println!("📄 {}", counter.html()?);

    // Ticker appended after the counter, updated five times a second
    let ticker = vibe.render(
        "<small>tick {{n}}</small>",
        MountOptions::default()
            .to(&counter)
            .position(Position::After)
            .vdata("n", 0),
    )?;
    ticker.mounted().await?;
    ticker.delay(
        Timing::FrameRate(5),
        5,
        Some(vibe::delay_fn(|h, step| {
            let _ = h.set("n", step.step);
            if step.is_last() {
                println!("⏱  done after {} ticks", step.total);
            }
        })),
    );
    ticker.fade_out(Duration::from_millis(300));

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("🧭 {}", vibe.body().html()?);

    vibe.teardown();
    Ok(())
}
