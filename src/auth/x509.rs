/*!
 * MONGODB-X509 (distilled spec §4.4). Credentials are supplied by the TLS
 * layer (not implemented by this driver, per the distilled spec's
 * Non-goals); this module only shapes the `authenticate` command.
 */

use crate::document;
use crate::bson::Document;

/// Builds `{authenticate: 1, mechanism: "MONGODB-X509", user: <subject_dn>}`
/// to run against the `$external` database.
pub fn authenticate_command(subject_dn: &str) -> Document {
    document! {
        "authenticate" => 1i32,
        "mechanism" => "MONGODB-X509",
        "user" => subject_dn,
    }
}

pub const EXTERNAL_DATABASE: &str = "$external";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_command_shape() {
        let cmd = authenticate_command("CN=client,OU=test");
        assert_eq!(cmd.get_i32("authenticate"), Some(1));
        assert_eq!(cmd.get_str("mechanism"), Some("MONGODB-X509"));
        assert_eq!(cmd.get_str("user"), Some("CN=client,OU=test"));
    }
}
