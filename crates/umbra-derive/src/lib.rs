//! Umbra Derive Macros: Shadow Declarations (Poka-Yoke)
//!
//! `#[derive(Shadow)]` attaches shadow metadata to a state type, so the
//! real class a shadow applies to is named once, next to the state it
//! keeps, and checked by the compiler.
//!
//! # Attributes
//!
//! - `of = PATH` (required) - the `ClassInfo` static of the shadowed class
//! - `name = "..."` - shadow class name (defaults to the type name)
//! - `call_through = bool` - run real bodies for unshadowed methods
//!   (default `true`); `false` makes them do nothing
//! - `min_sdk = N`, `max_sdk = N` - API-level range the shadow applies to
//!
//! # Example
//!
//! ```ignore
//! use umbra::prelude::*;
//!
//! static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
//!
//! #[derive(Default, Shadow)]
//! #[shadow(of = VIEW, call_through = false, min_sdk = 21)]
//! struct ShadowView {
//!     width: i32,
//! }
//!
//! let class = ShadowView::shadow_builder()
//!     .method("getWidth", &[], |s, _| Ok(Value::Int(s.width)))
//!     .build()?;
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, LitBool, LitInt, LitStr, Path};

/// Derive `umbra::ShadowType` for a shadow state type.
///
/// Also adds `shadow_builder()`, a [`ShadowClassBuilder`] preloaded with the
/// declared metadata.
///
/// [`ShadowClassBuilder`]: https://docs.rs/umbra/latest/umbra/struct.ShadowClassBuilder.html
#[proc_macro_derive(Shadow, attributes(shadow))]
pub fn derive_shadow(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_shadow(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_shadow(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let attrs = extract_shadow_attributes(&input.attrs)?;
    let Some(of) = attrs.of else {
        return Err(syn::Error::new_spanned(
            name,
            "#[derive(Shadow)] requires #[shadow(of = CLASS_INFO)]",
        ));
    };
    let shadow_name = attrs.name.unwrap_or_else(|| name.to_string());
    let call_through = attrs.call_through.unwrap_or(true);
    let min_sdk = option_tokens(attrs.min_sdk);
    let max_sdk = option_tokens(attrs.max_sdk);

    if let (Some(min), Some(max)) = (attrs.min_sdk, attrs.max_sdk) {
        if min > max {
            return Err(syn::Error::new_spanned(
                name,
                format!("min_sdk {min} is greater than max_sdk {max}"),
            ));
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::umbra::ShadowType for #name #ty_generics #where_clause {
            fn shadow_name() -> &'static str {
                #shadow_name
            }

            fn real_class() -> ::umbra::RealClass {
                ::umbra::RealClass::of(&#of)
            }

            fn options() -> ::umbra::ShadowOptions {
                ::umbra::ShadowOptions {
                    call_through_by_default: #call_through,
                    min_sdk: #min_sdk,
                    max_sdk: #max_sdk,
                }
            }
        }

        impl #impl_generics #name #ty_generics #where_clause {
            /// Builder for this shadow class, preloaded with its declared metadata
            #[must_use]
            #[allow(dead_code)]
            pub fn shadow_builder() -> ::umbra::ShadowClassBuilder<Self> {
                ::umbra::ShadowClass::of::<Self>()
            }
        }
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

#[derive(Default)]
struct ShadowAttributes {
    of: Option<Path>,
    name: Option<String>,
    call_through: Option<bool>,
    min_sdk: Option<u32>,
    max_sdk: Option<u32>,
}

/// Collect every `#[shadow(...)]` key on the type
fn extract_shadow_attributes(attrs: &[Attribute]) -> syn::Result<ShadowAttributes> {
    let mut out = ShadowAttributes::default();
    for attr in attrs {
        if !attr.path().is_ident("shadow") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("of") {
                out.of = Some(meta.value()?.parse::<Path>()?);
            } else if meta.path.is_ident("name") {
                out.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("call_through") {
                out.call_through = Some(meta.value()?.parse::<LitBool>()?.value);
            } else if meta.path.is_ident("min_sdk") {
                out.min_sdk = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("max_sdk") {
                out.max_sdk = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else {
                return Err(meta.error("unknown shadow attribute"));
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn option_tokens(value: Option<u32>) -> TokenStream2 {
    match value {
        Some(v) => quote!(::core::option::Option::Some(#v)),
        None => quote!(::core::option::Option::None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_extract_all_attributes() {
        let input: DeriveInput = parse_quote! {
            #[shadow(of = crate::VIEW, name = "ShadowView", call_through = false)]
            #[shadow(min_sdk = 21, max_sdk = 28)]
            struct ViewState;
        };
        let attrs = extract_shadow_attributes(&input.attrs).unwrap();
        assert!(attrs.of.unwrap().segments.last().unwrap().ident == "VIEW");
        assert_eq!(attrs.name.as_deref(), Some("ShadowView"));
        assert_eq!(attrs.call_through, Some(false));
        assert_eq!(attrs.min_sdk, Some(21));
        assert_eq!(attrs.max_sdk, Some(28));
    }

    #[test]
    fn test_unknown_attribute_is_error() {
        let input: DeriveInput = parse_quote! {
            #[shadow(of = VIEW, looseness = 3)]
            struct ViewState;
        };
        assert!(extract_shadow_attributes(&input.attrs).is_err());
    }

    #[test]
    fn test_missing_of_is_error() {
        let input: DeriveInput = parse_quote! {
            #[shadow(name = "ShadowView")]
            struct ViewState;
        };
        let err = expand_shadow(&input).unwrap_err();
        assert!(err.to_string().contains("requires"));
    }

    #[test]
    fn test_inverted_sdk_range_is_error() {
        let input: DeriveInput = parse_quote! {
            #[shadow(of = VIEW, min_sdk = 30, max_sdk = 21)]
            struct ViewState;
        };
        assert!(expand_shadow(&input).is_err());
    }

    #[test]
    fn test_expansion_defaults() {
        let input: DeriveInput = parse_quote! {
            #[shadow(of = VIEW)]
            struct ShadowView { width: i32 }
        };
        let tokens = expand_shadow(&input).unwrap().to_string();
        assert!(tokens.contains("\"ShadowView\""));
        assert!(tokens.contains("call_through_by_default : true"));
        assert!(tokens.contains("shadow_builder"));
    }
}
