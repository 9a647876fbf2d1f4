use vcdmig_client::poll::wait_for_tasks;
use vcdmig_client::Platform;
use vcdmig_domain::{Element, PollPolicy};

use crate::error::MigrateError;

/// Drop what the platform assigns itself: identity attributes, navigation
/// links and in-flight tasks.
pub fn strip_server_fields(root: &mut Element) {
    for attr in ["href", "id", "status", "operationKey"] {
        root.remove_attr(attr);
    }
    root.prune("Link");
    root.prune("Tasks");
}

/// Keep only the direct children listed in `names`, in their source order.
pub fn keep_children(root: &mut Element, names: &[&str]) {
    root.retain_children(|c| names.contains(&c.local_name()));
}

/// Remove `href`/`type` from every element below `el`. Used for settings
/// sections, which link back to themselves.
pub fn strip_self_links(el: &mut Element) {
    el.walk_mut(&mut |e| {
        e.remove_attr("href");
        e.remove_attr("type");
    });
}

/// POST `body`, wait for the tasks it spawned, and return the response.
pub async fn submit(
    platform: &dyn Platform,
    href: &str,
    media_type: &str,
    body: &Element,
    poll: &PollPolicy,
) -> Result<Element, MigrateError> {
    let response = platform.post(href, media_type, body).await?;
    wait_for_tasks(platform, &response, poll).await?;
    Ok(response)
}

/// The href the platform assigned to a created object.
pub fn created_href(response: &Element, what: &str) -> Result<String, MigrateError> {
    response
        .attr("href")
        .map(str::to_string)
        .ok_or_else(|| MigrateError::Internal(format!("creation of {} returned no href", what)))
}
