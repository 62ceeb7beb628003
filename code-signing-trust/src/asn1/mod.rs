// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 primitives for CMS signatures and their revocation data.

The types defined in this module are intended to be extremely low-level
and only to be used for deserialization. See types outside the
`asn1` module tree for higher-level functionality.
*/

use bcder::decode::{Content, DecodeError, Source};

pub mod rfc3161;
pub mod rfc5280;
pub mod rfc5652;
pub mod rfc6960;
pub mod time;

/// Skip over a value of any form.
pub(crate) fn skip_content<S: Source>(
    content: &mut Content<S>,
) -> Result<(), DecodeError<S::Error>> {
    match content {
        Content::Primitive(prim) => prim.skip_all(),
        Content::Constructed(cons) => cons.skip_all(),
    }
}
