/// Session key holding the authenticated [`Identity`](crate::message::Identity).
pub const USER_ID: &str = "user_id";
