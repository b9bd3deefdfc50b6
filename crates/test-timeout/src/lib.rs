use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, ExprPath, ItemFn, Lit, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

struct TimeoutArgs {
    timeout_secs: u64,
    flavor: Flavor,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            flavor: Flavor::CurrentThread,
        };
        let items = Punctuated::<Expr, Token![,]>::parse_terminated(input)?;
        for item in items {
            match &item {
                Expr::Lit(ExprLit {
                    lit: Lit::Int(lit), ..
                }) => {
                    let secs: u64 = lit.base10_parse()?;
                    if secs == 0 {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "timeout must be greater than zero",
                        ));
                    }
                    args.timeout_secs = secs;
                }
                Expr::Path(ExprPath { path, .. }) if path.is_ident("multi_thread") => {
                    args.flavor = Flavor::MultiThread;
                }
                Expr::Path(ExprPath { path, .. }) if path.is_ident("current_thread") => {
                    args.flavor = Flavor::CurrentThread;
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected a timeout in seconds or `multi_thread` / `current_thread`",
                    ));
                }
            }
        }
        Ok(args)
    }
}

/// Runs an async test on a dedicated thread and fails it once the deadline passes.
///
/// `#[tokio_timeout_test]`, `#[tokio_timeout_test(10)]` or
/// `#[tokio_timeout_test(30, multi_thread)]`.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = args.timeout_secs;
    let builder = match args.flavor {
        Flavor::CurrentThread => quote! { tokio::runtime::Builder::new_current_thread() },
        Flavor::MultiThread => quote! {
            {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                builder.worker_threads(2);
                builder
            }
        },
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = #builder
                        .enable_all()
                        .build()
                        .expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(timeout_duration, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration + std::time::Duration::from_secs(1)) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
