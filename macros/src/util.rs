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

//! Attribute inspection helpers.

use proc_macro2::TokenTree;
use syn::{Attribute, Meta};

/// Tells whether the list of attributes contains `repr(C)`.
pub fn has_repr_c(attrs: &[Attribute]) -> bool {
	attrs
		.iter()
		.filter(|attr| attr.path().is_ident("repr"))
		.filter_map(|attr| match &attr.meta {
			Meta::List(list) => Some(list.tokens.clone()),
			_ => None,
		})
		.flatten()
		.any(|tok| matches!(&tok, TokenTree::Ident(ident) if ident == "C"))
}
