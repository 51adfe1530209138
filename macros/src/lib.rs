//! Procedural macros for the csi-radio-esp32 TAP harness.
//!
//! Provides `#[tap_test]`, which registers a function with the harness in
//! `csi_radio_esp32::testing` so the `device-tests` binary runs it on host,
//! QEMU or hardware.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType, Token};

/// Mark a function as a TAP test.
///
/// The function either returns nothing (a panic means failure) or a
/// `Result<(), E>` with `E: Error` (an `Err` means failure).
///
/// - `#[tap_test]` regular test
/// - `#[tap_test(should_panic)]` must panic
/// - `#[tap_test(should_panic = "msg")]` must panic with a message containing `msg`
///
/// ```ignore
/// use csi_radio_esp32_macros::tap_test;
///
/// #[tap_test]
/// fn default_channel_is_valid() {
///     assert!(validate_channel(DEFAULT_CHANNEL).is_ok());
/// }
///
/// #[tap_test(should_panic = "invalid channel")]
/// fn channel_zero_rejected() {
///     validate_channel(0).unwrap();
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let should_panic = match parse_should_panic(attr) {
        Ok(sp) => sp,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match should_panic {
        ShouldPanic::No if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        ShouldPanic::No => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        ShouldPanic::Yes => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        ShouldPanic::WithMessage(msg) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #input_fn

        ::csi_radio_esp32::testing::inventory::submit! {
            ::csi_radio_esp32::testing::TapTestEntry::new(
                module_path!(),
                #fn_name_str,
                |runner: &mut ::csi_radio_esp32::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum ShouldPanic {
    No,
    Yes,
    WithMessage(String),
}

fn parse_should_panic(attr: TokenStream) -> syn::Result<ShouldPanic> {
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;
    let mut result = ShouldPanic::No;

    for meta in metas {
        if !meta.path().is_ident("should_panic") {
            return Err(syn::Error::new_spanned(
                meta.path(),
                "tap_test: unknown attribute, expected `should_panic` or `should_panic = \"message\"`",
            ));
        }
        result = match meta {
            Meta::Path(_) => ShouldPanic::Yes,
            Meta::NameValue(nv) => match nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => ShouldPanic::WithMessage(s.value()),
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "tap_test: should_panic expects a string literal",
                    ))
                }
            },
            Meta::List(list) => {
                return Err(syn::Error::new_spanned(
                    list,
                    "tap_test: use `should_panic` or `should_panic = \"message\"`",
                ))
            }
        };
    }

    Ok(result)
}
