use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Implements `crate::conditions::Conditions` for a status struct that owns a
/// `conditions: Option<Vec<Condition>>` field.
#[proc_macro_derive(Conditions)]
pub fn derive_conditions(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let has_conditions_field = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields
                .named
                .iter()
                .any(|f| f.ident.as_ref().is_some_and(|ident| ident == "conditions")),
            _ => false,
        },
        _ => false,
    };

    if !has_conditions_field {
        return syn::Error::new_spanned(
            name,
            "#[derive(Conditions)] requires a named `conditions` field",
        )
        .to_compile_error()
        .into();
    }

    let expanded = quote! {
        impl crate::conditions::Conditions for #name {
            fn conditions(&self) -> &Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>> {
                &self.conditions
            }
            fn conditions_mut(&mut self) -> &mut Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>> {
                &mut self.conditions
            }
        }
    };

    TokenStream::from(expanded)
}
