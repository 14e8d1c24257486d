use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one running against a
/// freshly launched server over in-process stores, and inject dependencies.
///
/// Injectable dependencies are identified by type name:
/// - `Client`: [`rocket::local::asynchronous::Client`] for the server.
/// - `Stores`: the stores behind the server, for seeding and inspection.
/// - `TestClock`: the server's manual clock.
/// - `Outbox`: the SMS sender, which records rather than sends.
/// - `AdminAuth`: an `Authorization` header for a logged-in admin. Requires
///   `#[backend_test(admin)]`.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);
    let login_admin = match parse_macro_input!(args as Option<Ident>) {
        None => false,
        Some(arg) if arg == "admin" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `admin` or nothing")
                .into_compile_error()
                .into();
        }
    };

    // Extract the arguments to inject and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), login_admin) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let maybe_login = if login_admin {
        quote! { let admin_auth = env.admin_auth().await; }
    } else {
        TokenStream2::new()
    };

    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let env = crate::test_support::TestEnv::launch().await;
                #maybe_login
                #[allow(unused_variables)]
                let crate::test_support::TestEnv { client, stores, clock, outbox } = env;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, map each parameter to the value to
/// inject, and reject unknown or repeated parameters.
fn check_sig(sig: Signature, login_admin: bool) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen: Vec<String> = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        let type_ident = match input {
            FnArg::Typed(pat_type) => match (&*pat_type.pat, &*pat_type.ty) {
                (Pat::Ident(_), Type::Path(type_path)) => type_path.path.get_ident().cloned(),
                _ => None,
            },
            FnArg::Receiver(_) => None,
        };
        let type_ident = match type_ident {
            Some(ident) => ident,
            None => {
                return Err(syn::Error::new(
                    input.span(),
                    "Expected `ident: Type` where Type is one of `Client`, `Stores`, `TestClock`, `Outbox` or `AdminAuth`",
                ));
            }
        };

        let name = type_ident.to_string();
        if seen.contains(&name) {
            return Err(syn::Error::new(
                input.span(),
                format!("Test cannot accept more than one `{name}`"),
            ));
        }
        let arg = match name.as_str() {
            "Client" => quote! { client },
            "Stores" => quote! { stores },
            "TestClock" => quote! { clock },
            "Outbox" => quote! { outbox },
            "AdminAuth" if login_admin => quote! { admin_auth },
            "AdminAuth" => {
                return Err(syn::Error::new(
                    input.span(),
                    "`AdminAuth` requires `#[backend_test(admin)]`",
                ));
            }
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "Expected one of `Client`, `Stores`, `TestClock`, `Outbox` or `AdminAuth`",
                ));
            }
        };
        seen.push(name);
        args.push(arg);
    }

    Ok(args)
}
