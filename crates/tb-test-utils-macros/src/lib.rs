// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute macros that wrap a test in a [`tb_test_utils::TestLoggerGuard`].
//!
//! The wrapped body sees a `logger: &mut TestLogger` binding, and `tracing`
//! output emitted while it runs lands in the test's own log file.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, ItemFn, ReturnType, Type};

/// Synchronous test with a per-test log file.
///
/// ```rust,ignore
/// use tb_test_utils::logged_test;
///
/// #[logged_test]
/// fn flushes_on_silence() {
///     logger.log("running").unwrap();
/// }
/// ```
#[proc_macro_attribute]
pub fn logged_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return error(Span::call_site(), "#[logged_test] does not accept arguments");
    }

    let input = parse_macro_input!(item as ItemFn);
    if let Some(async_token) = &input.sig.asyncness {
        return error(
            async_token.span(),
            "#[logged_test] cannot be applied to async functions; use #[logged_tokio_test] instead",
        );
    }

    generate(input, quote! { #[::core::prelude::v1::test] }, "logged_test")
}

/// Tokio test with a per-test log file.
///
/// Arguments are forwarded to `#[tokio::test]`, e.g.
/// `#[logged_tokio_test(flavor = "multi_thread")]`.
#[proc_macro_attribute]
pub fn logged_tokio_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = TokenStream2::from(attr);
    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return error(
            input.sig.ident.span(),
            "#[logged_tokio_test] requires an async function",
        );
    }

    let harness = if args.is_empty() {
        quote! { #[::tokio::test] }
    } else {
        quote! { #[::tokio::test( #args )] }
    };
    generate(input, harness, "logged_tokio_test")
}

fn error(span: Span, message: &str) -> TokenStream {
    syn::Error::new(span, message).to_compile_error().into()
}

fn generate(mut input: ItemFn, harness: TokenStream2, macro_name: &str) -> TokenStream {
    input.attrs.retain(|attr| !is_logged_attr(attr));

    let fn_ident = &input.sig.ident;
    if !input.sig.inputs.is_empty() {
        return error(
            fn_ident.span(),
            &format!(
                "#[{}] can only be applied to functions without parameters",
                macro_name
            ),
        );
    }

    let fn_name = fn_ident.to_string();
    let visibility = &input.vis;
    let asyncness = &input.sig.asyncness;
    let generics = &input.sig.generics;
    let (return_kind, return_tokens) = classify_return(&input.sig.output);
    let finish = finish_body(return_kind);
    let block = &input.block;
    let other_attrs = &input.attrs;

    let expanded = quote! {
        #harness
        #(#other_attrs)*
        #visibility #asyncness fn #fn_ident #generics () #return_tokens {
            let mut __guard = ::tb_test_utils::TestLoggerGuard::new(#fn_name)
                .expect("failed to create TestLogger");
            let mut logger = __guard.logger();
            let _ = &mut logger;

            let inner_result = { #block };
            drop(logger);
            #finish
        }
    };

    expanded.into()
}

#[derive(Clone, Copy)]
enum ReturnKind {
    Unit,
    Result,
    Other,
}

fn classify_return(output: &ReturnType) -> (ReturnKind, TokenStream2) {
    match output {
        ReturnType::Default => (ReturnKind::Unit, quote! {}),
        ReturnType::Type(arrow, ty) if is_result_type(ty) => {
            (ReturnKind::Result, quote! { #arrow #ty })
        }
        ReturnType::Type(arrow, ty) => (ReturnKind::Other, quote! { #arrow #ty }),
    }
}

fn is_result_type(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Result"),
        _ => false,
    }
}

fn finish_body(return_kind: ReturnKind) -> TokenStream2 {
    let success = quote! {
        if let Err(e) = __guard.finish_success() {
            panic!("failed to finalize TestLogger: {}", e);
        }
    };
    match return_kind {
        ReturnKind::Unit => quote! {
            let _ = inner_result;
            #success
        },
        ReturnKind::Result => quote! {
            match inner_result {
                ::std::result::Result::Ok(value) => {
                    #success
                    ::std::result::Result::Ok(value)
                }
                ::std::result::Result::Err(err) => {
                    let __err_msg = format!("{}", err);
                    if let Err(e) = __guard.finish_failure(&__err_msg) {
                        eprintln!("failed to finalize TestLogger after error: {}", e);
                    }
                    ::std::result::Result::Err(err)
                }
            }
        },
        ReturnKind::Other => quote! {
            let value = inner_result;
            #success
            value
        },
    }
}

fn is_logged_attr(attr: &syn::Attribute) -> bool {
    attr.path()
        .get_ident()
        .is_some_and(|ident| ident == "logged_test" || ident == "logged_tokio_test")
}
