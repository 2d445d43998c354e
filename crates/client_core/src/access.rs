use shared::domain::Address;

/// Whether the connected identity administers the election.
///
/// `Address` is lowercased when parsed, so a plain comparison is already
/// case-insensitive. Either side missing means no admin access.
pub fn is_admin(admin: Option<&Address>, connected: Option<&Address>) -> bool {
    match (admin, connected) {
        (Some(admin), Some(connected)) => admin == connected,
        _ => false,
    }
}
