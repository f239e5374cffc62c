//! Read-only view over a loaded PDF.
//!
//! Everything the analyzer, the preview sampler and the raster strategies need
//! to know about a page (its geometry, its content operations, where its
//! images are painted and where its text sits) is answered here, without ever
//! mutating the underlying document.

use std::collections::HashMap;

use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};

use crate::error::{CompressError, Result};

/// US Letter, used when neither the page nor its ancestors carry a MediaBox.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Guard against cyclic `/Parent` chains in malformed files.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Form XObjects nested deeper than this are not entered.
const MAX_FORM_DEPTH: usize = 8;

/// Path painting and shading operators.
const PAINT_OPERATORS: [&str; 10] = ["S", "s", "f", "F", "f*", "B", "B*", "b", "b*", "sh"];

/// 2D affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::identity()
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        Some(Matrix {
            a: number(&operands[0])?,
            b: number(&operands[1])?,
            c: number(&operands[2])?,
            d: number(&operands[3])?,
            e: number(&operands[4])?,
            f: number(&operands[5])?,
        })
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }

    /// Axis-aligned bounds of the unit square under this transform, which is
    /// where an image XObject lands on the page.
    pub fn unit_square_bounds(&self) -> (f32, f32, f32, f32) {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(1.0, 0.0),
            self.apply(0.0, 1.0),
            self.apply(1.0, 1.0),
        ];
        let mut bounds = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in corners {
            bounds.0 = bounds.0.min(x);
            bounds.1 = bounds.1.min(y);
            bounds.2 = bounds.2.max(x);
            bounds.3 = bounds.3.max(y);
        }
        bounds
    }

    fn horizontal_scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Visible region of a page in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One text-showing operation, positioned in default user space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    /// Decoded through the font's encoding or ToUnicode map.
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    /// Shown with a render mode that paints nothing (3 or 7).
    pub invisible: bool,
}

impl TextItem {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Where an image XObject is painted: the image object and the CTM in force
/// at the `Do`.
#[derive(Debug, Clone)]
pub struct ImagePlacement {
    pub id: ObjectId,
    pub name: Vec<u8>,
    pub ctm: Matrix,
}

/// What a single pass over a page's content (forms included) found.
#[derive(Debug, Clone, Default)]
pub struct PageScan {
    pub image_ops: usize,
    pub text_items: Vec<TextItem>,
    pub placements: Vec<ImagePlacement>,
    /// Paths, shadings and inline images.
    pub other_paint_ops: usize,
}

impl PageScan {
    /// True when image XObjects are the only thing that shows on the page.
    pub fn is_image_only(&self) -> bool {
        self.other_paint_ops == 0
            && self
                .text_items
                .iter()
                .all(|item| item.invisible || item.is_blank())
    }
}

/// An opened document. Owned by exactly one session and never mutated after
/// load; strategies work on private copies of [`DocumentHandle::source`].
pub struct DocumentHandle {
    doc: Document,
    source: Vec<u8>,
    pages: Vec<ObjectId>,
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("size_bytes", &self.source.len())
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl DocumentHandle {
    pub fn load(source: Vec<u8>) -> Result<Self> {
        let doc = decode(&source)?;
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(CompressError::Decode("document has no pages".to_string()));
        }
        debug!(
            "Loaded PDF: {} bytes, {} pages, {} objects",
            source.len(),
            pages.len(),
            doc.objects.len()
        );
        Ok(DocumentHandle { doc, source, pages })
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn size_bytes(&self) -> u64 {
        self.source.len() as u64
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Validates a 1-based page number.
    pub fn check_page(&self, page_number: usize) -> Result<()> {
        self.page_id(page_number).map(|_| ())
    }

    fn page_id(&self, page_number: usize) -> Result<ObjectId> {
        if page_number == 0 || page_number > self.pages.len() {
            return Err(CompressError::PageOutOfRange {
                page: page_number,
                count: self.pages.len(),
            });
        }
        Ok(self.pages[page_number - 1])
    }

    /// The (possibly inherited) MediaBox, normalized so `x`/`y` is the
    /// lower-left corner.
    pub fn page_box(&self, page_number: usize) -> Result<PageBox> {
        let page_id = self.page_id(page_number)?;
        let media_box = self
            .inherited(page_id, b"MediaBox")
            .and_then(|obj| obj.as_array().ok())
            .and_then(|arr| {
                let v: Vec<f32> = arr.iter().filter_map(|o| number(self.resolve(o))).collect();
                if v.len() == 4 {
                    Some(PageBox {
                        x: v[0].min(v[2]),
                        y: v[1].min(v[3]),
                        width: (v[2] - v[0]).abs(),
                        height: (v[3] - v[1]).abs(),
                    })
                } else {
                    None
                }
            })
            .filter(|b| b.width > 0.0 && b.height > 0.0)
            .unwrap_or(PageBox {
                x: 0.0,
                y: 0.0,
                width: DEFAULT_PAGE_SIZE.0,
                height: DEFAULT_PAGE_SIZE.1,
            });
        Ok(media_box)
    }

    /// Page width and height in points.
    pub fn page_size(&self, page_number: usize) -> Result<(f32, f32)> {
        let b = self.page_box(page_number)?;
        Ok((b.width, b.height))
    }

    /// Inherited `/Rotate`, normalized to 0, 90, 180 or 270.
    pub fn page_rotation(&self, page_number: usize) -> Result<i64> {
        let page_id = self.page_id(page_number)?;
        let rotate = self
            .inherited(page_id, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360);
        if rotate % 90 != 0 {
            warn!("Page {} has invalid /Rotate {}; ignoring", page_number, rotate);
            return Ok(0);
        }
        Ok(rotate)
    }

    pub fn page_operations(&self, page_number: usize) -> Result<Vec<Operation>> {
        let page_id = self.page_id(page_number)?;
        let content = self.doc.get_page_content(page_id)?;
        let content = Content::decode(&content)?;
        Ok(content.operations)
    }

    fn page_resources(&self, page_number: usize) -> Option<&Dictionary> {
        let page_id = self.page_id(page_number).ok()?;
        self.inherited(page_id, b"Resources")
            .and_then(|obj| obj.as_dict().ok())
    }

    /// A stream object by id, if it is one.
    pub fn stream(&self, id: ObjectId) -> Option<&Stream> {
        self.doc.get_object(id).ok()?.as_stream().ok()
    }

    fn xobject<'a>(
        &'a self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
    ) -> Option<(ObjectId, &'a Stream)> {
        let xobjects = self
            .resolve(resources?.get(b"XObject").ok()?)
            .as_dict()
            .ok()?;
        let id = xobjects.get(name).ok()?.as_reference().ok()?;
        Some((id, self.stream(id)?))
    }

    fn font_encoding<'a>(
        &'a self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
    ) -> Option<Encoding<'a>> {
        let fonts = self.resolve(resources?.get(b"Font").ok()?).as_dict().ok()?;
        let font = self.resolve(fonts.get(name).ok()?).as_dict().ok()?;
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|subtype| subtype == b"Type0")
            .unwrap_or(false);
        // Without either, lopdf guesses StandardEncoding noisily; Latin-1 is as good.
        if !font.type_is(b"Font") || !(composite || font.has(b"Encoding")) {
            return None;
        }
        match font.get_font_encoding(&self.doc) {
            Ok(encoding) => Some(encoding),
            Err(e) => {
                debug!(
                    "No usable encoding for font /{}: {:?}",
                    String::from_utf8_lossy(name),
                    e
                );
                None
            }
        }
    }

    /// Walks the page's content operations once, descending into form
    /// XObjects, and records image paints, other paints and text shows.
    pub fn scan_page(&self, page_number: usize) -> Result<PageScan> {
        let operations = self.page_operations(page_number)?;
        let mut scan = PageScan::default();
        self.scan_operations(
            &operations,
            self.page_resources(page_number),
            Matrix::identity(),
            0,
            &mut scan,
        );
        Ok(scan)
    }

    fn scan_operations<'a>(
        &'a self,
        operations: &[Operation],
        resources: Option<&'a Dictionary>,
        base_ctm: Matrix,
        depth: usize,
        scan: &mut PageScan,
    ) {
        let mut ctm_stack = vec![base_ctm];
        let mut text_matrix = Matrix::identity();
        let mut line_matrix = Matrix::identity();
        let mut font_size = 0.0f32;
        let mut leading = 0.0f32;
        let mut render_mode = 0i64;
        let mut fonts: HashMap<Vec<u8>, Option<Encoding<'a>>> = HashMap::new();
        let mut font: Option<Vec<u8>> = None;

        for op in operations {
            let operands = &op.operands;
            let ctm = *ctm_stack.last().unwrap_or(&base_ctm);
            match op.operator.as_str() {
                "q" => ctm_stack.push(ctm),
                "Q" => {
                    if ctm_stack.len() > 1 {
                        ctm_stack.pop();
                    }
                }
                "cm" => {
                    if let (Some(m), Some(top)) =
                        (Matrix::from_operands(operands), ctm_stack.last_mut())
                    {
                        *top = m.concat(top);
                    }
                }
                "BT" => {
                    text_matrix = Matrix::identity();
                    line_matrix = Matrix::identity();
                }
                "Tf" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        if !fonts.contains_key(name) {
                            fonts.insert(name.clone(), self.font_encoding(resources, name));
                        }
                        font = Some(name.clone());
                    }
                    if let Some(size) = operands.get(1).and_then(number) {
                        font_size = size;
                    }
                }
                "TL" => {
                    if let Some(l) = operands.first().and_then(number) {
                        leading = l;
                    }
                }
                "Tr" => {
                    if let Some(mode) = operands.first().and_then(|o| o.as_i64().ok()) {
                        render_mode = mode;
                    }
                }
                "Td" | "TD" => {
                    let tx = operands.first().and_then(number).unwrap_or(0.0);
                    let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                    if op.operator == "TD" {
                        leading = -ty;
                    }
                    line_matrix = Matrix::translate(tx, ty).concat(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        line_matrix = m;
                        text_matrix = m;
                    }
                }
                "T*" => {
                    line_matrix = Matrix::translate(0.0, -leading).concat(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tj" | "TJ" | "'" | "\"" => {
                    if op.operator != "Tj" && op.operator != "TJ" {
                        line_matrix = Matrix::translate(0.0, -leading).concat(&line_matrix);
                        text_matrix = line_matrix;
                    }
                    let encoding = font
                        .as_ref()
                        .and_then(|name| fonts.get(name))
                        .and_then(Option::as_ref);
                    let rendering = text_matrix.concat(&ctm);
                    scan.text_items.push(TextItem {
                        text: decode_text(encoding, &shown_bytes(op)),
                        x: rendering.e,
                        y: rendering.f,
                        font_size: font_size * rendering.horizontal_scale(),
                        invisible: render_mode == 3 || render_mode == 7,
                    });
                }
                "Do" => {
                    let Some(Object::Name(name)) = operands.first() else {
                        continue;
                    };
                    let Some((id, stream)) = self.xobject(resources, name) else {
                        continue;
                    };
                    if is_image(&stream.dict) {
                        scan.image_ops += 1;
                        scan.placements.push(ImagePlacement {
                            id,
                            name: name.clone(),
                            ctm,
                        });
                    } else if is_form(&stream.dict) {
                        self.scan_form(stream, resources, ctm, depth, scan);
                    }
                }
                "BI" => {
                    scan.image_ops += 1;
                    scan.other_paint_ops += 1;
                }
                other if PAINT_OPERATORS.contains(&other) => scan.other_paint_ops += 1,
                _ => {}
            }
        }
    }

    /// Scans a form XObject's content under its `/Matrix`. A form without
    /// its own `/Resources` uses the caller's.
    fn scan_form<'a>(
        &'a self,
        form: &'a Stream,
        resources: Option<&'a Dictionary>,
        ctm: Matrix,
        depth: usize,
        scan: &mut PageScan,
    ) {
        if depth >= MAX_FORM_DEPTH {
            warn!("Form XObjects nested deeper than {}; not entered", MAX_FORM_DEPTH);
            return;
        }
        let operations = match form
            .get_plain_content()
            .and_then(|content| Content::decode(&content))
        {
            Ok(content) => content.operations,
            Err(e) => {
                warn!("Skipping unreadable form XObject: {:?}", e);
                return;
            }
        };
        let matrix = form
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|obj| self.resolve(obj).as_array().ok())
            .and_then(|arr| Matrix::from_operands(arr))
            .unwrap_or_default();
        let form_resources = form
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| self.resolve(obj).as_dict().ok())
            .or(resources);
        self.scan_operations(
            &operations,
            form_resources,
            matrix.concat(&ctm),
            depth + 1,
            scan,
        );
    }

    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.doc.get_dictionary(page_id).ok();
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let dict = current?;
            if let Ok(obj) = dict.get(key) {
                return Some(self.resolve(obj));
            }
            current = dict
                .get(b"Parent")
                .and_then(Object::as_reference)
                .and_then(|id| self.doc.get_dictionary(id))
                .ok();
        }
        warn!("Inheritance chain too deep looking up {:?}", String::from_utf8_lossy(key));
        None
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(obj),
            _ => obj,
        }
    }
}

/// Parses and, where needed, decrypts a PDF held in memory.
pub(crate) fn decode(bytes: &[u8]) -> Result<Document> {
    let mut doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        if let Err(e) = doc.decrypt(b"") {
            warn!("Failed to decrypt with empty password: {:?}", e);
        }
    }
    Ok(doc)
}

pub(crate) fn is_image(dict: &Dictionary) -> bool {
    dict.get(b"Subtype")
        .map(|obj| matches!(obj, Object::Name(n) if n == b"Image"))
        .unwrap_or(false)
}

fn is_form(dict: &Dictionary) -> bool {
    dict.get(b"Subtype")
        .map(|obj| matches!(obj, Object::Name(n) if n == b"Form"))
        .unwrap_or(false)
}

fn decode_text(encoding: Option<&Encoding>, bytes: &[u8]) -> String {
    encoding
        .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
        .unwrap_or_else(|| bytes.iter().map(|&b| b as char).collect())
}

fn shown_bytes(op: &Operation) -> Vec<u8> {
    match op.operands.last() {
        Some(Object::String(bytes, _)) => bytes.clone(),
        Some(Object::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Object::String(bytes, _) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-memory PDFs for tests, built object by object.
    //!
    //! Every page shares one resource dictionary: `/F1` is Helvetica with no
    //! explicit encoding, `/F2` is a composite Identity-H font whose ToUnicode
    //! map sends codes 1 and 2 to "H" and "i", `/Im0` is a 16x16 RGB image and
    //! `/Fm0` is a form that paints `/Im0` at 100x50 under `[1 0 0 1 10 20]`.

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

    const TO_UNICODE: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0001> <0048>
<0002> <0069>
endbfchar
endcmap
CMapName currentdict /CMap defineresource pop
end
end
";

    /// Shape of one generated page.
    #[derive(Debug, Clone, Copy)]
    pub struct PageSpec {
        pub text_items: usize,
        pub images: usize,
        /// Lower-left corner of the page's own MediaBox.
        pub origin: (i64, i64),
        pub rotate: i64,
    }

    impl PageSpec {
        /// Moves the MediaBox, and everything drawn on it, by `(x, y)`.
        pub fn shifted(self, x: i64, y: i64) -> Self {
            PageSpec {
                origin: (x, y),
                ..self
            }
        }

        pub fn rotated(self, degrees: i64) -> Self {
            PageSpec {
                rotate: degrees,
                ..self
            }
        }
    }

    pub fn text_page(text_items: usize) -> PageSpec {
        image_page(0, text_items)
    }

    pub fn image_page(images: usize, text_items: usize) -> PageSpec {
        PageSpec {
            text_items,
            images,
            origin: (0, 0),
            rotate: 0,
        }
    }

    /// Builds a PDF whose pages match `specs`. Images are 16x16 RGB gradients
    /// stored raw so that re-encoding has something to chew on.
    pub fn build_pdf(specs: &[PageSpec]) -> Vec<u8> {
        let pages = specs
            .iter()
            .map(|spec| {
                let (ox, oy) = spec.origin;
                let mut operations = Vec::new();
                for i in 0..spec.images {
                    let offset = 50 + 10 * i as i64;
                    operations.push(Operation::new("q", vec![]));
                    operations.push(Operation::new(
                        "cm",
                        vec![
                            200.into(),
                            0.into(),
                            0.into(),
                            200.into(),
                            (offset + ox).into(),
                            (offset + oy).into(),
                        ],
                    ));
                    operations.push(Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]));
                    operations.push(Operation::new("Q", vec![]));
                }
                if spec.text_items > 0 {
                    operations.push(Operation::new("BT", vec![]));
                    operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
                    for i in 0..spec.text_items {
                        let y = 750 - (i as i64 % 60) * 12;
                        operations.push(Operation::new(
                            "Tm",
                            vec![
                                1.into(),
                                0.into(),
                                0.into(),
                                1.into(),
                                (72 + ox).into(),
                                (y + oy).into(),
                            ],
                        ));
                        operations.push(Operation::new(
                            "Tj",
                            vec![Object::string_literal(format!("Line {}", i))],
                        ));
                    }
                    operations.push(Operation::new("ET", vec![]));
                }

                let mut extra = Dictionary::new();
                if spec.origin != (0, 0) {
                    extra.set(
                        "MediaBox",
                        vec![ox.into(), oy.into(), (ox + 612).into(), (oy + 792).into()],
                    );
                }
                if spec.rotate != 0 {
                    extra.set("Rotate", spec.rotate);
                }
                (operations, extra)
            })
            .collect();
        assemble(pages)
    }

    /// One page that paints the image only through `/Fm0`.
    pub fn form_image_pdf() -> Vec<u8> {
        let operations = vec![Operation::new("Do", vec![Object::Name(b"Fm0".to_vec())])];
        assemble(vec![(operations, Dictionary::new())])
    }

    /// One page showing "Hi" in the composite font as `<00010002>`.
    pub fn composite_font_pdf() -> Vec<u8> {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F2".into(), 12.into()]),
            Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), 700.into()],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(vec![0, 1, 0, 2], StringFormat::Hexadecimal)],
            ),
            Operation::new("ET", vec![]),
        ];
        assemble(vec![(operations, Dictionary::new())])
    }

    /// One page whose only content is a filled rectangle.
    pub fn vector_pdf() -> Vec<u8> {
        let operations = vec![
            Operation::new("re", vec![100.into(), 100.into(), 200.into(), 80.into()]),
            Operation::new("f", vec![]),
        ];
        assemble(vec![(operations, Dictionary::new())])
    }

    fn encode(operations: Vec<Operation>) -> Vec<u8> {
        Content { operations }
            .encode()
            .expect("fixture content encodes")
    }

    fn shared_resources(doc: &mut Document) -> Dictionary {
        let helvetica = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let to_unicode = doc.add_object(Stream::new(
            dictionary! {},
            TO_UNICODE.as_bytes().to_vec(),
        ));
        let composite = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "NotoSans",
            "Encoding" => "Identity-H",
            "ToUnicode" => to_unicode,
        });

        let mut pixels = Vec::with_capacity(16 * 16 * 3);
        for y in 0..16u8 {
            for x in 0..16u8 {
                pixels.extend_from_slice(&[x * 16, y * 16, 128]);
            }
        }
        let image: ObjectId = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 16,
                "Height" => 16,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        ));

        let form = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 100.into(), 50.into()],
                "Matrix" => vec![1.into(), 0.into(), 0.into(), 1.into(), 10.into(), 20.into()],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image },
                },
            },
            encode(vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![100.into(), 0.into(), 0.into(), 50.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ]),
        ));

        dictionary! {
            "Font" => dictionary! { "F1" => helvetica, "F2" => composite },
            "XObject" => dictionary! { "Im0" => image, "Fm0" => form },
        }
    }

    fn assemble(pages: Vec<(Vec<Operation>, Dictionary)>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let resources = shared_resources(&mut doc);

        let mut kids = Vec::new();
        for (operations, extra) in pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, encode(operations)));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources.clone(),
            };
            for (key, value) in extra.iter() {
                page.set(key.clone(), value.clone());
            }
            kids.push(doc.add_object(page).into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("fixture saves");
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn rejects_garbage() {
        let err = DocumentHandle::load(b"not a pdf".to_vec()).unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn scans_text_and_images() {
        let handle = DocumentHandle::load(build_pdf(&[image_page(2, 3)])).unwrap();
        let scan = handle.scan_page(1).unwrap();
        assert_eq!(scan.image_ops, 2);
        assert_eq!(scan.placements.len(), 2);
        assert_eq!(scan.text_items.len(), 3);
        assert!(!scan.is_image_only());

        let first = &scan.text_items[0];
        assert_eq!(first.text, "Line 0");
        assert_eq!((first.x, first.y), (72.0, 750.0));
        assert_eq!(first.font_size, 12.0);
        assert!(!first.invisible);
    }

    #[test]
    fn page_size_is_inherited_from_pages_node() {
        let handle = DocumentHandle::load(build_pdf(&[text_page(1)])).unwrap();
        assert_eq!(handle.page_size(1).unwrap(), (612.0, 792.0));
        assert_eq!(handle.page_rotation(1).unwrap(), 0);
    }

    #[test]
    fn page_box_keeps_its_origin_and_rotation() {
        let page = text_page(1).shifted(100, 200).rotated(-90);
        let handle = DocumentHandle::load(build_pdf(&[page])).unwrap();
        let page_box = handle.page_box(1).unwrap();
        assert_eq!((page_box.x, page_box.y), (100.0, 200.0));
        assert_eq!(handle.page_size(1).unwrap(), (612.0, 792.0));
        assert_eq!(handle.page_rotation(1).unwrap(), 270);
    }

    #[test]
    fn page_numbers_are_one_based() {
        let handle = DocumentHandle::load(build_pdf(&[text_page(1), text_page(1)])).unwrap();
        assert!(handle.check_page(1).is_ok());
        assert!(handle.check_page(2).is_ok());
        assert_eq!(
            handle.check_page(0),
            Err(CompressError::PageOutOfRange { page: 0, count: 2 })
        );
        assert!(handle.check_page(3).is_err());
    }

    #[test]
    fn placement_bounds_follow_ctm() {
        let handle = DocumentHandle::load(build_pdf(&[image_page(1, 0)])).unwrap();
        let scan = handle.scan_page(1).unwrap();
        let bounds = scan.placements[0].ctm.unit_square_bounds();
        assert_eq!(bounds, (50.0, 50.0, 250.0, 250.0));
        assert!(scan.is_image_only());
        assert!(handle.stream(scan.placements[0].id).is_some());
    }

    #[test]
    fn images_inside_forms_are_found() {
        let handle = DocumentHandle::load(form_image_pdf()).unwrap();
        let scan = handle.scan_page(1).unwrap();
        assert_eq!(scan.image_ops, 1);
        assert_eq!(scan.placements[0].name, b"Im0".to_vec());
        assert_eq!(
            scan.placements[0].ctm.unit_square_bounds(),
            (10.0, 20.0, 110.0, 70.0)
        );
        assert!(scan.is_image_only());
    }

    #[test]
    fn composite_font_text_goes_through_to_unicode() {
        let handle = DocumentHandle::load(composite_font_pdf()).unwrap();
        let scan = handle.scan_page(1).unwrap();
        assert_eq!(scan.text_items.len(), 1);
        assert_eq!(scan.text_items[0].text, "Hi");
        assert_eq!((scan.text_items[0].x, scan.text_items[0].y), (72.0, 700.0));
    }

    #[test]
    fn paths_count_as_other_paint() {
        let handle = DocumentHandle::load(vector_pdf()).unwrap();
        let scan = handle.scan_page(1).unwrap();
        assert_eq!(scan.image_ops, 0);
        assert_eq!(scan.other_paint_ops, 1);
        assert!(!scan.is_image_only());
    }
}
