//! Ping-Pong Example: two parties on one broadcast channel.
//!
//! A "widget" endpoint issues correlated requests; a "host" endpoint answers
//! them through its unsolicited handler. Both run on a single-threaded tokio
//! runtime inside a `LocalSet`, which is the scheduling model the transport
//! is built for.
//!
//! ```bash
//! cargo run --example ping_pong
//! ```

use std::rc::Rc;

use hostlink::{ChannelRole, LocalChannel, WidgetTransport};
use serde_json::json;

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let channel = LocalChannel::new(32);

    // Host side: answer every foreign request broadcast on the channel.
    let host = Rc::new(WidgetTransport::new(channel.endpoint()));
    let replier = Rc::downgrade(&host);
    host.set_unsolicited_handler(move |envelope| {
        let Some(host) = replier.upgrade() else { return };
        if envelope.role != ChannelRole::OutboundRequest {
            return;
        }
        match envelope.action.as_deref() {
            Some("ping") => {
                let n = envelope.data.as_ref().and_then(|d| d["n"].as_u64());
                println!("host: ping n={n:?}");
                host.reply(&envelope, json!({"pong": n}));
            }
            other => println!("host: ignoring action {other:?}"),
        }
    });

    // Widget side.
    let widget = WidgetTransport::new(channel);

    for n in 0..5_u64 {
        let reply = widget.request("ping", json!({"n": n})).await?;
        println!("widget: got {reply}");
    }

    widget.close();
    host.close();
    Ok(())
}

fn main() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build current-thread runtime");

    tokio::task::LocalSet::new().block_on(&runtime, async {
        if let Err(error) = run().await {
            eprintln!("example failed: {error}");
            std::process::exit(1);
        }
    });
}
