use serde::{Deserialize, Serialize};

/// Bearer-token claims. Tokens are issued by the identity service; this
/// core only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8,
    pub org_id: u64,
    pub branch_id: Option<u64>,
    pub exp: usize,
    pub jti: String,
    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}
