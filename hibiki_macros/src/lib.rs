use proc_macro::TokenStream;

mod derive_trait;

#[proc_macro_derive(JsonPayload)]
pub fn derive_json_payload(input: TokenStream) -> TokenStream {
    derive_trait::json_payload::derive_json_payload(input)
}

#[proc_macro_derive(DebugPayload)]
pub fn derive_debug_payload(input: TokenStream) -> TokenStream {
    derive_trait::debug_payload::derive_debug_payload(input)
}
