//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=debug` to see the breaker's own logging.

use context_breaker::{CircuitBreaker, Fallback};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stand-in for a real connection
#[derive(Debug)]
struct Connection {
    id: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    let next_id = Arc::new(AtomicU32::new(1));
    let healthy = Arc::new(AtomicBool::new(true));

    let circuit = CircuitBreaker::builder("payment_api")
        .timeout_ms(100)
        .window_ms(2_000)
        .volume_threshold(2)
        .error_threshold(50.0)
        .next_try_ms(500)
        .on_state_change(|name, state| println!("Circuit '{}' -> {}", name, state))
        .on_context_build_failed(|name, error| println!("Circuit '{}' build failed: {}", name, error))
        .context_builder({
            let next_id = next_id.clone();
            let healthy = healthy.clone();
            move || {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let healthy = healthy.load(Ordering::SeqCst);
                async move {
                    if healthy {
                        Ok(Connection { id })
                    } else {
                        Err("payment gateway unreachable")
                    }
                }
            }
        })
        .context_cleaner(|conn: Arc<Connection>| async move {
            println!("Closing connection {}", conn.id);
            Ok::<_, String>(())
        })
        .build();

    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("State after startup: {}\n", circuit.state_name());

    // Simulate successful calls
    println!("--- Successful calls ---");
    for i in 1..=2 {
        let result = circuit
            .run(
                move |conn| async move { Ok::<_, String>(format!("Payment {} via connection {}", i, conn.id)) },
                Fallback::none(),
            )
            .await;
        match result {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", circuit.state_name());

    // Simulate failures
    println!("--- Triggering failures ---");
    healthy.store(false, Ordering::SeqCst);
    for i in 1..=3 {
        let result = circuit
            .run(
                move |_conn| async move { Err::<String, _>(format!("Payment failed {}", i)) },
                Fallback::call(|err| Ok(format!("queued for later ({})", err))),
            )
            .await;
        match result {
            Ok(result) => println!("↺ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {} (circuit opened)\n", circuit.state_name());

    // Try calling while open
    println!("--- Attempting call while open ---");
    let result = circuit
        .run(
            |_conn| async { Ok::<_, String>("Should be rejected".to_string()) },
            Fallback::none(),
        )
        .await;
    match result {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    // Let the gateway recover and wait for a probe
    println!("--- Recovering ---");
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    println!("State after probe: {}\n", circuit.state_name());

    let result = circuit
        .run(
            |conn| async move { Ok::<_, String>(format!("Payment successful via connection {}", conn.id)) },
            Fallback::none(),
        )
        .await;
    match result {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}", circuit.state_name());

    circuit.destroy();
    tokio::time::sleep(Duration::from_millis(10)).await;
}
