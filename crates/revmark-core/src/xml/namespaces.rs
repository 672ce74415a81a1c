#![allow(non_snake_case)]

use super::xname::XName;

/// Namespace of `xmlns:prefix` declarations.
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

pub mod XML {
    use super::XName;
    pub const NS: &str = "http://www.w3.org/XML/1998/namespace";

    pub fn space() -> XName { XName::new(NS, "space") }
}

pub mod W {
    use super::XName;
    pub const NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    pub fn p() -> XName { XName::new(NS, "p") }
    pub fn pPr() -> XName { XName::new(NS, "pPr") }
    pub fn r() -> XName { XName::new(NS, "r") }
    pub fn rPr() -> XName { XName::new(NS, "rPr") }
    pub fn t() -> XName { XName::new(NS, "t") }
    pub fn delText() -> XName { XName::new(NS, "delText") }
    pub fn instrText() -> XName { XName::new(NS, "instrText") }
    pub fn delInstrText() -> XName { XName::new(NS, "delInstrText") }
    pub fn ins() -> XName { XName::new(NS, "ins") }
    pub fn del() -> XName { XName::new(NS, "del") }
    pub fn moveFrom() -> XName { XName::new(NS, "moveFrom") }
    pub fn moveTo() -> XName { XName::new(NS, "moveTo") }
    pub fn moveFromRangeStart() -> XName { XName::new(NS, "moveFromRangeStart") }
    pub fn moveFromRangeEnd() -> XName { XName::new(NS, "moveFromRangeEnd") }
    pub fn moveToRangeStart() -> XName { XName::new(NS, "moveToRangeStart") }
    pub fn moveToRangeEnd() -> XName { XName::new(NS, "moveToRangeEnd") }
    pub fn rPrChange() -> XName { XName::new(NS, "rPrChange") }
    pub fn pPrChange() -> XName { XName::new(NS, "pPrChange") }
    pub fn tr() -> XName { XName::new(NS, "tr") }
    pub fn trPr() -> XName { XName::new(NS, "trPr") }
    pub fn tc() -> XName { XName::new(NS, "tc") }
    pub fn footnotes() -> XName { XName::new(NS, "footnotes") }
    pub fn footnote() -> XName { XName::new(NS, "footnote") }
    pub fn endnotes() -> XName { XName::new(NS, "endnotes") }
    pub fn endnote() -> XName { XName::new(NS, "endnote") }

    // attributes
    pub fn id() -> XName { XName::new(NS, "id") }
    pub fn author() -> XName { XName::new(NS, "author") }
    pub fn date() -> XName { XName::new(NS, "date") }
    pub fn name() -> XName { XName::new(NS, "name") }
    pub fn type_() -> XName { XName::new(NS, "type") }
}

pub mod M {
    pub const NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/math";
}

pub mod MC {
    use super::XName;
    pub const NS: &str = "http://schemas.openxmlformats.org/markup-compatibility/2006";

    pub fn Ignorable() -> XName { XName::new(NS, "Ignorable") }
}

pub mod W14 {
    pub const NS: &str = "http://schemas.microsoft.com/office/word/2010/wordml";
}

/// Annotations written by consolidation; declared ignorable on the root.
pub mod RVM {
    use super::XName;
    pub const NS: &str = "http://schemas.revmark.dev/2024/consolidation";
    pub const PREFIX: &str = "rvm";

    pub fn color() -> XName { XName::new(NS, "color") }
    /// Author of the `n`th reviewer sharing a marker, counting from 2.
    pub fn author_n(n: usize) -> XName { XName::new(NS, &format!("author{n}")) }
    pub fn color_n(n: usize) -> XName { XName::new(NS, &format!("color{n}")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_namespace_creates_valid_xnames() {
        let p = W::p();
        assert_eq!(p.namespace, Some(W::NS.to_string()));
        assert_eq!(p.local_name, "p");
    }

    #[test]
    fn attribute_and_element_names_keep_their_local_names() {
        assert_eq!(W::type_().local_name, "type");
        assert_eq!(W::delText().local_name, "delText");
        assert_eq!(RVM::author_n(3).local_name, "author3");
    }
}
