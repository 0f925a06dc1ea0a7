use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use futures::stream::{self, StreamExt};

/// Outcome of one bounded fan-out: successes and failures keyed by the
/// partition they belong to. A failed partition never affects its siblings.
#[derive(Debug)]
pub struct FanOut<T> {
    pub ok: HashMap<String, T>,
    pub errors: BTreeMap<String, String>,
}

impl<T> FanOut<T> {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Map `task` over a keyed set with at most `limit` items in flight,
/// collecting per-partition successes and errors. Completion order is not
/// preserved; callers that need ordering sort afterwards.
///
/// This is the one concurrency primitive for all three fan-out levels
/// (contexts, namespaces within a context, containers within a namespace).
pub async fn bounded<I, T, F, Fut>(items: Vec<(String, I)>, limit: usize, task: F) -> FanOut<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let limit = limit.max(1);
    let outcomes: Vec<(String, anyhow::Result<T>)> =
        stream::iter(items.into_iter().map(|(key, item)| {
            let fut = task(item);
            async move { (key, fut.await) }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut ok = HashMap::new();
    let mut errors = BTreeMap::new();
    for (key, outcome) in outcomes {
        match outcome {
            Ok(value) => {
                ok.insert(key, value);
            }
            Err(err) => {
                errors.insert(key, format!("{:#}", err));
            }
        }
    }
    FanOut { ok, errors }
}
