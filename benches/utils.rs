use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

/// `n` profile contexts from a fixed seed, shared by every engine's bench.
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut contexts = Vec::with_capacity(n);

    for _ in 0..n {
        let name = random_string(&mut rng, 5, 10);
        let age = rng.random_range(18..80);
        let is_active = rng.random_bool(0.7);

        let items_count = rng.random_range(3..10);
        let mut items = Vec::with_capacity(items_count);
        for _ in 0..items_count {
            let item_name = random_string(&mut rng, 3, 8);
            let item_value = rng.random_range(10..1000);
            items.push(json!({
                "name": item_name,
                "value": item_value,
                "special": rng.random_bool(0.3)
            }));
        }

        contexts.push(json!({
            "user": {
                "name": name,
                "age": age,
                "active": is_active
            },
            "items": items,
            "show_details": rng.random_bool(0.8),
            "has_access": rng.random_bool(0.6),
        }));
    }

    contexts
}

/// A random lowercase word, with the odd character that needs HTML escaping.
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len)
        .map(|_| {
            if rng.random_bool(0.05) {
                ['<', '>', '&', '\''][rng.random_range(0..4)]
            } else {
                rng.random_range('a'..='z')
            }
        })
        .collect()
}

/// Report the size of the bench binary, a rough measure of what each engine pulls in.
pub fn print_binary_size() {
    let Ok(path) = std::env::current_exe() else {
        return;
    };
    if let Ok(metadata) = std::fs::metadata(&path) {
        let bytes = metadata.len();
        println!(
            "{}: {:.2} MB ({bytes} bytes)",
            path.display(),
            bytes as f64 / (1024.0 * 1024.0)
        );
    }
}
