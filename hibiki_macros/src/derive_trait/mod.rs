pub mod debug_payload;
pub mod json_payload;
