use std::future::Future;

use tracing::debug;
use vcdmig_domain::{Element, PollPolicy};

use crate::error::ClientError;
use crate::platform::Platform;

/// Re-run `check` every `policy.interval` until it yields a value, at most
/// `policy.max_attempts` times. Errors from `check` end the wait at once.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut check: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ClientError>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        debug!(what, attempt, max = policy.max_attempts, "Not ready yet");
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(ClientError::Timeout { what: what.to_string(), attempts: policy.max_attempts })
}

/// Hrefs of the tasks a mutating call returned: either the response is a
/// `Task` itself or it embeds `<Tasks><Task/></Tasks>`.
pub fn task_hrefs(response: &Element) -> Vec<String> {
    if response.local_name() == "Task" {
        return response.attr("href").map(str::to_string).into_iter().collect();
    }
    response
        .child("Tasks")
        .map(|tasks| {
            tasks
                .children_named("Task")
                .filter_map(|t| t.attr("href").map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Wait for every task attached to `response` to finish successfully.
pub async fn wait_for_tasks(
    platform: &dyn Platform,
    response: &Element,
    policy: &PollPolicy,
) -> Result<(), ClientError> {
    for href in task_hrefs(response) {
        let what = format!("task {}", href);
        poll_until(policy, &what, || {
            let href = href.as_str();
            async move {
                let task = platform.get(href).await?;
                match task.attr("status").unwrap_or("running") {
                    "success" => Ok(Some(())),
                    "error" | "aborted" | "canceled" => {
                        let detail = task
                            .child("Error")
                            .and_then(|e| e.attr("message"))
                            .or_else(|| task.attr("operation"))
                            .unwrap_or("no detail");
                        Err(ClientError::TaskFailed(format!("{}: {}", href, detail)))
                    }
                    _ => Ok(None),
                }
            }
        })
        .await?;
    }
    Ok(())
}

/// Poll an entity until its `status` attribute reports ready (`1`).
///
/// `-1` means the platform gave up provisioning it. Entities without a
/// status attribute are considered ready.
pub async fn wait_until_ready(
    platform: &dyn Platform,
    href: &str,
    what: &str,
    policy: &PollPolicy,
) -> Result<Element, ClientError> {
    poll_until(policy, what, || async move {
        let entity = platform.get(href).await?;
        match entity.attr("status") {
            None | Some("1") => Ok(Some(entity)),
            Some("-1") => Err(ClientError::TaskFailed(format!("{} failed to provision", what))),
            Some(_) => Ok(None),
        }
    })
    .await
}
