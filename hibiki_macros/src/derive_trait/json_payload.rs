use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

pub fn derive_json_payload(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics ::hibiki::IntoPayload for #name #ty_generics #where_clause {
            fn into_payload(self) -> ::core::result::Result<::hibiki::bytes::Bytes, ::hibiki::error::EncodeError> {
                ::hibiki::encoding::json(&self)
            }
        }
    }.into()
}
