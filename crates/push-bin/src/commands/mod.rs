pub mod feedback;
pub mod push;
pub mod serve;

use push_delivery::Notification;

/// One JSON line per failed notification on stdout.
pub fn print_failures(failures: &[Notification]) -> anyhow::Result<()> {
    for notification in failures {
        println!("{}", serde_json::to_string(notification)?);
    }
    Ok(())
}
