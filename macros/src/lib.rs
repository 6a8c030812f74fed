/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Sonata.
 *
 * Sonata is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Sonata is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Sonata. If not, see <https://www.gnu.org/licenses/>.
 */

//! This crate implements derive macros for the Sonata kernel.

#![deny(warnings)]

extern crate proc_macro;

mod util;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Implements the `AnyRepr` trait on the annotated structure, making it usable with
/// `utils::bytes`.
///
/// The structure must be `#[repr(C)]`, otherwise the macro results in a compilation error.
#[proc_macro_derive(AnyRepr)]
pub fn derive_any_repr(input: TokenStream) -> TokenStream {
	let input = parse_macro_input!(input as DeriveInput);
	if !util::has_repr_c(&input.attrs) {
		panic!("AnyRepr may be derived only on `repr(C)` structures");
	}
	let ident = input.ident;
	let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
	quote! {
		unsafe impl #impl_generics utils::bytes::AnyRepr for #ident #ty_generics #where_clause {}
	}
	.into()
}
