/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Attribute macro running an async test inside its own Tokio runtime.

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, Ident, ItemFn, ReturnType};

/// Runs an `async fn` test on a fresh runtime inside a span named after it.
///
/// By default the test runs on a multi-thread runtime. With
/// `#[courier_test(start_paused)]` it runs on a current-thread runtime whose
/// clock starts paused, so backoff delays elapse instantly.
///
/// Tests may return `()` or any `Result` whose error is `Debug`; an `Err`
/// fails the test. Panics are logged through `tracing` with their location
/// before the test fails.
#[proc_macro_attribute]
pub fn courier_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let start_paused = match attr.to_string().trim() {
        "" => false,
        "start_paused" => true,
        other => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                format!("unsupported courier_test option `{other}`, expected `start_paused`"),
            )
            .to_compile_error()
            .into();
        }
    };

    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    let async_name = Ident::new(&format!("__{name}_async"), name.span());

    let runtime = if start_paused {
        quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .expect("failed to build paused test runtime")
        }
    } else {
        quote! {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build test runtime")
        }
    };

    let finish = match output {
        ReturnType::Default => quote! { result },
        ReturnType::Type(..) => quote! { result.unwrap() },
    };

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            use std::panic;
            use std::sync::atomic::{AtomicBool, Ordering};
            use std::sync::Arc;

            #[derive(Default)]
            struct PanicRecord {
                occurred: AtomicBool,
                message: parking_lot::Mutex<Option<String>>,
                location: parking_lot::Mutex<Option<String>>,
            }

            let record = Arc::new(PanicRecord::default());
            let hook_record = Arc::clone(&record);

            let orig_hook = panic::take_hook();
            panic::set_hook(Box::new(move |info| {
                hook_record.occurred.store(true, Ordering::SeqCst);
                let payload = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned());
                let cleaned = payload
                    .clone()
                    .unwrap_or_else(|| "No error message".to_string())
                    .trim()
                    .replace('\n', " ");
                *hook_record.message.lock() = payload;
                *hook_record.location.lock() = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                tracing::error!("Panic: {}", cleaned);
                orig_hook(info);
            }));

            let runtime = #runtime;

            let result = runtime.block_on(async {
                let test_span = tracing::info_span!("courier_test", name = stringify!(#name));
                let _enter = test_span.enter();

                #async_name().await
            });

            if record.occurred.load(Ordering::SeqCst) {
                let location = record
                    .location
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown location".to_string());
                let message = record
                    .message
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "No error message".to_string())
                    .trim()
                    .replace('\n', " ");
                panic!("Panic at {}: {}", location, message);
            }

            #finish
        }

        async fn #async_name(#inputs) #output #body
    };

    expanded.into()
}
