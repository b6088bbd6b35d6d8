use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::AsRefStr;

// see: https://dev.mysql.com/doc/refman/8.0/en/identifier-length.html
// max packet payload length.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const ERR_TEXT_LEN: usize = 80;

pub const PACKET_HEADER_LEN: usize = 4;
/// auth-plugin-data-part-1: first 8 bytes of the server scramble, sent in the
/// initial handshake ahead of the capability/charset fields.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// Combined auth-plugin-data-part-1 + auth-plugin-data-part-2 length.
pub const SCRAMBLE_SIZE: usize = 20;

pub const MYSQL_USER_MAXLEN: usize = 128;
pub const MYSQL_DATABASE_MAXLEN: usize = 128;

pub const DEFAULT_AUTH_PLUGIN: &str = "mysql_native_password";

#[derive(Debug, PartialEq, Eq, AsRefStr, Clone, Copy)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySqlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "sha256_password")]
    AuthSha256Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
    #[strum(serialize = "auth_unknown_plugin")]
    UnknownPluginName,
}

impl AuthPluginName {
    pub fn from_name(name: &str) -> Self {
        match name {
            "mysql_old_password" => Self::AuthMySqlOldPassword,
            "caching_sha2_password" => Self::AuthCachingSha2Password,
            "sha256_password" => Self::AuthSha256Password,
            "mysql_native_password" => Self::AuthNativePassword,
            _ => Self::UnknownPluginName,
        }
    }

    pub fn is_native_password(&self) -> bool {
        matches!(self, Self::AuthNativePassword)
    }
}

#[derive(Debug, PartialEq, Eq, ToPrimitive, FromPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum HeaderInfo {
    OkHeader = 0x00,
    ErrHeader = 0xff,
    EofHeader = 0xfe,
    LocalInFileHeader = 0xfb,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDb,
    ComQuery,
    ComFieldList,
    ComCreateDb,
    ComDropDb,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}

impl CommandCode {
    pub fn expects_resultset(&self) -> bool {
        matches!(self, CommandCode::ComQuery | CommandCode::ComStmtFetch)
    }

    /// Commands whose reply shape must be captured verbatim via
    /// `SessionCommandReassembler`. `ComQuery` is deliberately excluded: its
    /// reply is either a bare OK/ERR or a full result set, routed through
    /// `ResultSetAggregator` instead (see `expects_resultset`).
    pub fn is_session_command(&self) -> bool {
        matches!(
            self,
            CommandCode::ComInitDb
                | CommandCode::ComChangeUser
                | CommandCode::ComStmtPrepare
                | CommandCode::ComStmtClose
                | CommandCode::ComSetOption
                | CommandCode::ComResetConnection
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_packet_size_test() {
        assert_eq!(16_777_215, MAX_PAYLOAD_LEN);
    }

    #[test]
    fn auth_plugin_name_roundtrip() {
        assert_eq!(
            AuthPluginName::AuthNativePassword.as_ref(),
            "mysql_native_password"
        );
        assert!(AuthPluginName::from_name("mysql_native_password").is_native_password());
        assert!(!AuthPluginName::from_name("sha256_password").is_native_password());
    }

    #[test]
    fn command_code_classification() {
        assert!(CommandCode::ComQuery.expects_resultset());
        assert!(!CommandCode::ComPing.expects_resultset());
        assert!(CommandCode::ComChangeUser.is_session_command());
    }
}
