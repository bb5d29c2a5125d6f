//! # Binweave Derive Macros
//!
//! This crate provides the procedural macros for `binweave`. `#[derive(BinaryObject)]`
//! implements `BinarySerializable` by traversing every field in declaration order,
//! and `rt::Field` so the structure can itself be embedded inline in another one.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Index, LitStr, parse_macro_input};

/// Derives `BinarySerializable` and `rt::Field`.
///
/// Field attributes:
/// * `#[bin(skip)]`: the field is not part of the byte layout.
/// * `#[bin(name = "...")]`: label used in field logs instead of the field name.
#[proc_macro_derive(BinaryObject, attributes(bin))]
pub fn derive_binary_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(ds) => ds,
        _ => {
            return syn::Error::new(name.span(), "BinaryObject only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let mut steps = Vec::new();
    let members: Vec<(proc_macro2::TokenStream, String, &[Attribute])> = match &data_struct.fields {
        Fields::Named(named) => named
            .named
            .iter()
            .filter_map(|f| {
                f.ident
                    .as_ref()
                    .map(|ident| (quote!(#ident), ident.to_string(), f.attrs.as_slice()))
            })
            .collect(),
        Fields::Unnamed(unnamed) => unnamed
            .unnamed
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let index = Index::from(i);
                (quote!(#index), i.to_string(), f.attrs.as_slice())
            })
            .collect(),
        Fields::Unit => Vec::new(),
    };

    for (member, default_label, attrs) in members {
        let options = match parse_attributes(attrs) {
            Ok(res) => res,
            Err(e) => return e.to_compile_error().into(),
        };
        if options.skip {
            continue;
        }
        let label = options.name.unwrap_or(default_label);
        steps.push(quote! {
            ::binweave::rt::Field::serialize_field(&mut self.#member, s, #label)?;
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::binweave::BinarySerializable for #name #ty_generics #where_clause {
            fn serialize_impl(
                &mut self,
                s: &mut dyn ::binweave::SerializerObject,
            ) -> ::binweave::Result<()> {
                #(#steps)*
                Ok(())
            }
        }

        impl #impl_generics ::binweave::rt::Field for #name #ty_generics #where_clause {
            fn serialize_field(
                &mut self,
                s: &mut dyn ::binweave::SerializerObject,
                name: &str,
            ) -> ::binweave::Result<()> {
                s.serialize_inline(self, name)
            }
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    name: Option<String>,
}

fn parse_attributes(attrs: &[Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if attr.path().is_ident("bin") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    return Ok(());
                }

                if meta.path.is_ident("name") {
                    let value = meta.value()?;
                    let s: LitStr = value.parse()?;
                    options.name = Some(s.value());
                    return Ok(());
                }
                Err(meta.error("Unknown bin attribute key. Supported: skip, name"))
            })?;
        }
    }
    Ok(options)
}
