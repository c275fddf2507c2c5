//! Hand-maintained codec for the message envelopes in [`crate::proto`].
//!
//! Field numbers are part of the wire contract and never reused. Unknown
//! fields are skipped on decode; a missing oneof arm or an out-of-range
//! enum discriminant is a [`DecodeError`].

use crate::proto::*;
use crate::wire::{malformed, DecodeError, Reader, Writer};

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

pub fn encode_inbound(message: &InboundMessage) -> Vec<u8> {
    let mut w = Writer::new();
    w.uint32(1, message.compilation_id);
    match &message.payload {
        InboundPayload::CompileRequest(m) => w.message(2, |w| encode_compile_request(w, m)),
        InboundPayload::CanonicalizeResponse(m) => {
            w.message(3, |w| encode_canonicalize_response(w, m))
        }
        InboundPayload::ImportResponse(m) => w.message(4, |w| encode_import_response(w, m)),
        InboundPayload::FileImportResponse(m) => {
            w.message(5, |w| encode_file_import_response(w, m))
        }
        InboundPayload::FunctionCallResponse(m) => {
            w.message(6, |w| encode_function_call_response(w, m))
        }
        InboundPayload::VersionRequest(m) => w.message(7, |w| w.uint32(1, m.id)),
    }
    w.into_bytes()
}

pub fn decode_inbound(bytes: &[u8]) -> Result<InboundMessage, DecodeError> {
    let mut r = Reader::new(bytes);
    let mut compilation_id = 0;
    let mut payload = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => compilation_id = r.uint32(field, wt)?,
            2 => {
                payload = Some(InboundPayload::CompileRequest(decode_compile_request(
                    r.sub(field, wt)?,
                )?));
            }
            3 => {
                payload = Some(InboundPayload::CanonicalizeResponse(
                    decode_canonicalize_response(r.sub(field, wt)?)?,
                ));
            }
            4 => {
                payload = Some(InboundPayload::ImportResponse(decode_import_response(
                    r.sub(field, wt)?,
                )?));
            }
            5 => {
                payload = Some(InboundPayload::FileImportResponse(
                    decode_file_import_response(r.sub(field, wt)?)?,
                ));
            }
            6 => {
                payload = Some(InboundPayload::FunctionCallResponse(
                    decode_function_call_response(r.sub(field, wt)?)?,
                ));
            }
            7 => {
                let mut sub = r.sub(field, wt)?;
                let mut id = 0;
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => id = sub.uint32(f, w)?,
                        _ => sub.skip(f, w)?,
                    }
                }
                payload = Some(InboundPayload::VersionRequest(VersionRequest { id }));
            }
            _ => r.skip(field, wt)?,
        }
    }
    let payload = payload.ok_or_else(|| malformed("inbound message carries no payload"))?;
    Ok(InboundMessage {
        compilation_id,
        payload,
    })
}

pub fn encode_outbound(message: &OutboundMessage) -> Vec<u8> {
    let mut w = Writer::new();
    w.uint32(1, message.compilation_id);
    match &message.payload {
        OutboundPayload::CompileResponse(m) => w.message(2, |w| encode_compile_response(w, m)),
        OutboundPayload::LogEvent(m) => w.message(3, |w| encode_log_event(w, m)),
        OutboundPayload::CanonicalizeRequest(m) => {
            w.message(4, |w| encode_canonicalize_request(w, m))
        }
        OutboundPayload::ImportRequest(m) => w.message(5, |w| encode_import_request(w, m)),
        OutboundPayload::FileImportRequest(m) => w.message(6, |w| encode_file_import_request(w, m)),
        OutboundPayload::FunctionCallRequest(m) => {
            w.message(7, |w| encode_function_call_request(w, m))
        }
        OutboundPayload::ProtocolError(m) => w.message(8, |w| encode_protocol_error(w, m)),
        OutboundPayload::VersionResponse(m) => w.message(9, |w| encode_version_response(w, m)),
    }
    w.into_bytes()
}

pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundMessage, DecodeError> {
    let mut r = Reader::new(bytes);
    let mut compilation_id = 0;
    let mut payload = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => compilation_id = r.uint32(field, wt)?,
            2 => {
                payload = Some(OutboundPayload::CompileResponse(decode_compile_response(
                    r.sub(field, wt)?,
                )?));
            }
            3 => {
                payload = Some(OutboundPayload::LogEvent(decode_log_event(
                    r.sub(field, wt)?,
                )?));
            }
            4 => {
                payload = Some(OutboundPayload::CanonicalizeRequest(
                    decode_canonicalize_request(r.sub(field, wt)?)?,
                ));
            }
            5 => {
                payload = Some(OutboundPayload::ImportRequest(decode_import_request(
                    r.sub(field, wt)?,
                )?));
            }
            6 => {
                payload = Some(OutboundPayload::FileImportRequest(
                    decode_file_import_request(r.sub(field, wt)?)?,
                ));
            }
            7 => {
                payload = Some(OutboundPayload::FunctionCallRequest(
                    decode_function_call_request(r.sub(field, wt)?)?,
                ));
            }
            8 => {
                payload = Some(OutboundPayload::ProtocolError(decode_protocol_error(
                    r.sub(field, wt)?,
                )?));
            }
            9 => {
                payload = Some(OutboundPayload::VersionResponse(decode_version_response(
                    r.sub(field, wt)?,
                )?));
            }
            _ => r.skip(field, wt)?,
        }
    }
    let payload = payload.ok_or_else(|| malformed("outbound message carries no payload"))?;
    Ok(OutboundMessage {
        compilation_id,
        payload,
    })
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

fn syntax_to_wire(syntax: Syntax) -> u32 {
    match syntax {
        Syntax::Scss => 0,
        Syntax::Indented => 1,
        Syntax::Css => 2,
    }
}

fn syntax_from_wire(value: u32) -> Result<Syntax, DecodeError> {
    match value {
        0 => Ok(Syntax::Scss),
        1 => Ok(Syntax::Indented),
        2 => Ok(Syntax::Css),
        other => Err(malformed(format!("unknown syntax discriminant {other}"))),
    }
}

fn style_to_wire(style: OutputStyle) -> u32 {
    match style {
        OutputStyle::Expanded => 0,
        OutputStyle::Compressed => 1,
    }
}

fn style_from_wire(value: u32) -> Result<OutputStyle, DecodeError> {
    match value {
        0 => Ok(OutputStyle::Expanded),
        1 => Ok(OutputStyle::Compressed),
        other => Err(malformed(format!("unknown style discriminant {other}"))),
    }
}

fn log_kind_to_wire(kind: LogEventKind) -> u32 {
    match kind {
        LogEventKind::Warning => 0,
        LogEventKind::DeprecationWarning => 1,
        LogEventKind::Debug => 2,
    }
}

fn log_kind_from_wire(value: u32) -> Result<LogEventKind, DecodeError> {
    match value {
        0 => Ok(LogEventKind::Warning),
        1 => Ok(LogEventKind::DeprecationWarning),
        2 => Ok(LogEventKind::Debug),
        other => Err(malformed(format!("unknown log event kind {other}"))),
    }
}

fn protocol_error_kind_to_wire(kind: ProtocolErrorKind) -> u32 {
    match kind {
        ProtocolErrorKind::Parse => 0,
        ProtocolErrorKind::Params => 1,
        ProtocolErrorKind::Internal => 2,
    }
}

fn protocol_error_kind_from_wire(value: u32) -> Result<ProtocolErrorKind, DecodeError> {
    match value {
        0 => Ok(ProtocolErrorKind::Parse),
        1 => Ok(ProtocolErrorKind::Params),
        2 => Ok(ProtocolErrorKind::Internal),
        other => Err(malformed(format!("unknown protocol error kind {other}"))),
    }
}

fn separator_to_wire(separator: WireSeparator) -> u32 {
    match separator {
        WireSeparator::Comma => 0,
        WireSeparator::Space => 1,
        WireSeparator::Slash => 2,
        WireSeparator::Undecided => 3,
    }
}

fn separator_from_wire(value: u32) -> Result<WireSeparator, DecodeError> {
    match value {
        0 => Ok(WireSeparator::Comma),
        1 => Ok(WireSeparator::Space),
        2 => Ok(WireSeparator::Slash),
        3 => Ok(WireSeparator::Undecided),
        other => Err(malformed(format!("unknown list separator {other}"))),
    }
}

fn singleton_to_wire(singleton: SingletonValue) -> u32 {
    match singleton {
        SingletonValue::True => 0,
        SingletonValue::False => 1,
        SingletonValue::Null => 2,
    }
}

fn singleton_from_wire(value: u32) -> Result<SingletonValue, DecodeError> {
    match value {
        0 => Ok(SingletonValue::True),
        1 => Ok(SingletonValue::False),
        2 => Ok(SingletonValue::Null),
        other => Err(malformed(format!("unknown singleton value {other}"))),
    }
}

fn calc_operator_to_wire(operator: CalcOperator) -> u32 {
    match operator {
        CalcOperator::Plus => 0,
        CalcOperator::Minus => 1,
        CalcOperator::Times => 2,
        CalcOperator::Divide => 3,
    }
}

fn calc_operator_from_wire(value: u32) -> Result<CalcOperator, DecodeError> {
    match value {
        0 => Ok(CalcOperator::Plus),
        1 => Ok(CalcOperator::Minus),
        2 => Ok(CalcOperator::Times),
        3 => Ok(CalcOperator::Divide),
        other => Err(malformed(format!("unknown calculation operator {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Compile request
// ---------------------------------------------------------------------------

fn encode_importer_ref(w: &mut Writer, importer: &ImporterRef) {
    match importer {
        ImporterRef::LoadPath(path) => w.string_always(1, path),
        ImporterRef::ImporterId(id) => w.uint32_always(2, *id),
        ImporterRef::FileImporterId(id) => w.uint32_always(3, *id),
    }
}

fn decode_importer_ref(mut r: Reader<'_>) -> Result<ImporterRef, DecodeError> {
    let mut importer = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => importer = Some(ImporterRef::LoadPath(r.string(field, wt)?)),
            2 => importer = Some(ImporterRef::ImporterId(r.uint32(field, wt)?)),
            3 => importer = Some(ImporterRef::FileImporterId(r.uint32(field, wt)?)),
            _ => r.skip(field, wt)?,
        }
    }
    importer.ok_or_else(|| malformed("importer reference carries no variant"))
}

fn encode_string_input(w: &mut Writer, input: &StringInput) {
    w.string(1, &input.source);
    if let Some(url) = &input.url {
        w.string_always(2, url);
    }
    w.uint32(3, syntax_to_wire(input.syntax));
    if let Some(importer) = &input.importer {
        w.message(4, |w| encode_importer_ref(w, importer));
    }
}

fn decode_string_input(mut r: Reader<'_>) -> Result<StringInput, DecodeError> {
    let mut input = StringInput {
        source: String::new(),
        url: None,
        syntax: Syntax::Scss,
        importer: None,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => input.source = r.string(field, wt)?,
            2 => input.url = Some(r.string(field, wt)?),
            3 => input.syntax = syntax_from_wire(r.uint32(field, wt)?)?,
            4 => input.importer = Some(decode_importer_ref(r.sub(field, wt)?)?),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(input)
}

fn encode_compile_request(w: &mut Writer, request: &CompileRequest) {
    match &request.input {
        CompileInput::String(input) => w.message(1, |w| encode_string_input(w, input)),
        CompileInput::Path(path) => w.string_always(2, path),
    }
    w.uint32(3, style_to_wire(request.style));
    w.boolean(4, request.source_map);
    w.boolean(5, request.source_map_include_sources);
    for importer in &request.importers {
        w.message(6, |w| encode_importer_ref(w, importer));
    }
    for signature in &request.global_functions {
        w.string_always(7, signature);
    }
    w.boolean(8, request.alert_color);
    w.boolean(9, request.alert_ascii);
    w.boolean(10, request.verbose);
    w.boolean(11, request.quiet_deps);
    w.boolean(12, request.charset);
}

fn decode_compile_request(mut r: Reader<'_>) -> Result<CompileRequest, DecodeError> {
    let mut input = None;
    let mut request = CompileRequest {
        input: CompileInput::Path(String::new()),
        style: OutputStyle::Expanded,
        source_map: false,
        source_map_include_sources: false,
        importers: Vec::new(),
        global_functions: Vec::new(),
        alert_color: false,
        alert_ascii: false,
        verbose: false,
        quiet_deps: false,
        charset: false,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => input = Some(CompileInput::String(decode_string_input(r.sub(field, wt)?)?)),
            2 => input = Some(CompileInput::Path(r.string(field, wt)?)),
            3 => request.style = style_from_wire(r.uint32(field, wt)?)?,
            4 => request.source_map = r.boolean(field, wt)?,
            5 => request.source_map_include_sources = r.boolean(field, wt)?,
            6 => request.importers.push(decode_importer_ref(r.sub(field, wt)?)?),
            7 => request.global_functions.push(r.string(field, wt)?),
            8 => request.alert_color = r.boolean(field, wt)?,
            9 => request.alert_ascii = r.boolean(field, wt)?,
            10 => request.verbose = r.boolean(field, wt)?,
            11 => request.quiet_deps = r.boolean(field, wt)?,
            12 => request.charset = r.boolean(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    request.input = input.ok_or_else(|| malformed("compile request carries no input"))?;
    Ok(request)
}

// ---------------------------------------------------------------------------
// Compile response
// ---------------------------------------------------------------------------

fn encode_source_location(w: &mut Writer, location: &SourceLocation) {
    w.uint32(1, location.offset);
    w.uint32(2, location.line);
    w.uint32(3, location.column);
}

fn decode_source_location(mut r: Reader<'_>) -> Result<SourceLocation, DecodeError> {
    let mut location = SourceLocation::default();
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => location.offset = r.uint32(field, wt)?,
            2 => location.line = r.uint32(field, wt)?,
            3 => location.column = r.uint32(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    Ok(location)
}

fn encode_source_span(w: &mut Writer, span: &SourceSpan) {
    w.string(1, &span.text);
    w.message(2, |w| encode_source_location(w, &span.start));
    if let Some(end) = &span.end {
        w.message(3, |w| encode_source_location(w, end));
    }
    if let Some(url) = &span.url {
        w.string_always(4, url);
    }
    if let Some(context) = &span.context {
        w.string_always(5, context);
    }
}

fn decode_source_span(mut r: Reader<'_>) -> Result<SourceSpan, DecodeError> {
    let mut span = SourceSpan::default();
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => span.text = r.string(field, wt)?,
            2 => span.start = decode_source_location(r.sub(field, wt)?)?,
            3 => span.end = Some(decode_source_location(r.sub(field, wt)?)?),
            4 => span.url = Some(r.string(field, wt)?),
            5 => span.context = Some(r.string(field, wt)?),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(span)
}

fn encode_compile_response(w: &mut Writer, response: &CompileResponse) {
    match &response.result {
        CompileOutcome::Success(success) => w.message(1, |w| {
            w.string(1, &success.css);
            if let Some(source_map) = &success.source_map {
                w.string_always(2, source_map);
            }
        }),
        CompileOutcome::Failure(failure) => w.message(2, |w| {
            w.string(1, &failure.message);
            if let Some(span) = &failure.span {
                w.message(2, |w| encode_source_span(w, span));
            }
            if let Some(stack_trace) = &failure.stack_trace {
                w.string_always(3, stack_trace);
            }
            if let Some(formatted) = &failure.formatted {
                w.string_always(4, formatted);
            }
        }),
    }
    for url in &response.loaded_urls {
        w.string_always(3, url);
    }
}

fn decode_compile_response(mut r: Reader<'_>) -> Result<CompileResponse, DecodeError> {
    let mut result = None;
    let mut loaded_urls = Vec::new();
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => {
                let mut sub = r.sub(field, wt)?;
                let mut success = CompileSuccess {
                    css: String::new(),
                    source_map: None,
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => success.css = sub.string(f, w)?,
                        2 => success.source_map = Some(sub.string(f, w)?),
                        _ => sub.skip(f, w)?,
                    }
                }
                result = Some(CompileOutcome::Success(success));
            }
            2 => {
                let mut sub = r.sub(field, wt)?;
                let mut failure = CompileFailure {
                    message: String::new(),
                    span: None,
                    stack_trace: None,
                    formatted: None,
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => failure.message = sub.string(f, w)?,
                        2 => failure.span = Some(decode_source_span(sub.sub(f, w)?)?),
                        3 => failure.stack_trace = Some(sub.string(f, w)?),
                        4 => failure.formatted = Some(sub.string(f, w)?),
                        _ => sub.skip(f, w)?,
                    }
                }
                result = Some(CompileOutcome::Failure(failure));
            }
            3 => loaded_urls.push(r.string(field, wt)?),
            _ => r.skip(field, wt)?,
        }
    }
    let result = result.ok_or_else(|| malformed("compile response carries no result"))?;
    Ok(CompileResponse {
        result,
        loaded_urls,
    })
}

// ---------------------------------------------------------------------------
// Log events
// ---------------------------------------------------------------------------

fn encode_log_event(w: &mut Writer, event: &LogEvent) {
    w.uint32(1, log_kind_to_wire(event.kind));
    w.string(2, &event.message);
    if let Some(span) = &event.span {
        w.message(3, |w| encode_source_span(w, span));
    }
    if let Some(stack_trace) = &event.stack_trace {
        w.string_always(4, stack_trace);
    }
}

fn decode_log_event(mut r: Reader<'_>) -> Result<LogEvent, DecodeError> {
    let mut event = LogEvent {
        kind: LogEventKind::Warning,
        message: String::new(),
        span: None,
        stack_trace: None,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => event.kind = log_kind_from_wire(r.uint32(field, wt)?)?,
            2 => event.message = r.string(field, wt)?,
            3 => event.span = Some(decode_source_span(r.sub(field, wt)?)?),
            4 => event.stack_trace = Some(r.string(field, wt)?),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(event)
}

// ---------------------------------------------------------------------------
// Importer callbacks
// ---------------------------------------------------------------------------

fn encode_canonicalize_request(w: &mut Writer, request: &CanonicalizeRequest) {
    w.uint32(1, request.id);
    w.uint32(2, request.importer_id);
    w.string(3, &request.url);
    w.boolean(4, request.from_import);
}

fn decode_canonicalize_request(mut r: Reader<'_>) -> Result<CanonicalizeRequest, DecodeError> {
    let mut request = CanonicalizeRequest {
        id: 0,
        importer_id: 0,
        url: String::new(),
        from_import: false,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => request.id = r.uint32(field, wt)?,
            2 => request.importer_id = r.uint32(field, wt)?,
            3 => request.url = r.string(field, wt)?,
            4 => request.from_import = r.boolean(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    Ok(request)
}

fn encode_canonicalize_response(w: &mut Writer, response: &CanonicalizeResponse) {
    w.uint32(1, response.id);
    match &response.result {
        Some(CanonicalizeResult::Url(url)) => w.string_always(2, url),
        Some(CanonicalizeResult::Error(message)) => w.string_always(3, message),
        None => {}
    }
}

fn decode_canonicalize_response(mut r: Reader<'_>) -> Result<CanonicalizeResponse, DecodeError> {
    let mut response = CanonicalizeResponse {
        id: 0,
        result: None,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => response.id = r.uint32(field, wt)?,
            2 => response.result = Some(CanonicalizeResult::Url(r.string(field, wt)?)),
            3 => response.result = Some(CanonicalizeResult::Error(r.string(field, wt)?)),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(response)
}

fn encode_import_request(w: &mut Writer, request: &ImportRequest) {
    w.uint32(1, request.id);
    w.uint32(2, request.importer_id);
    w.string(3, &request.url);
}

fn decode_import_request(mut r: Reader<'_>) -> Result<ImportRequest, DecodeError> {
    let mut request = ImportRequest {
        id: 0,
        importer_id: 0,
        url: String::new(),
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => request.id = r.uint32(field, wt)?,
            2 => request.importer_id = r.uint32(field, wt)?,
            3 => request.url = r.string(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    Ok(request)
}

fn encode_import_response(w: &mut Writer, response: &ImportResponse) {
    w.uint32(1, response.id);
    match &response.result {
        Some(ImportResult::Success(success)) => w.message(2, |w| {
            w.string(1, &success.contents);
            w.uint32(2, syntax_to_wire(success.syntax));
            if let Some(url) = &success.source_map_url {
                w.string_always(3, url);
            }
        }),
        Some(ImportResult::Error(message)) => w.string_always(3, message),
        None => {}
    }
}

fn decode_import_response(mut r: Reader<'_>) -> Result<ImportResponse, DecodeError> {
    let mut response = ImportResponse {
        id: 0,
        result: None,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => response.id = r.uint32(field, wt)?,
            2 => {
                let mut sub = r.sub(field, wt)?;
                let mut success = ImportSuccess {
                    contents: String::new(),
                    syntax: Syntax::Scss,
                    source_map_url: None,
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => success.contents = sub.string(f, w)?,
                        2 => success.syntax = syntax_from_wire(sub.uint32(f, w)?)?,
                        3 => success.source_map_url = Some(sub.string(f, w)?),
                        _ => sub.skip(f, w)?,
                    }
                }
                response.result = Some(ImportResult::Success(success));
            }
            3 => response.result = Some(ImportResult::Error(r.string(field, wt)?)),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(response)
}

fn encode_file_import_request(w: &mut Writer, request: &FileImportRequest) {
    w.uint32(1, request.id);
    w.uint32(2, request.importer_id);
    w.string(3, &request.url);
    w.boolean(4, request.from_import);
}

fn decode_file_import_request(mut r: Reader<'_>) -> Result<FileImportRequest, DecodeError> {
    let mut request = FileImportRequest {
        id: 0,
        importer_id: 0,
        url: String::new(),
        from_import: false,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => request.id = r.uint32(field, wt)?,
            2 => request.importer_id = r.uint32(field, wt)?,
            3 => request.url = r.string(field, wt)?,
            4 => request.from_import = r.boolean(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    Ok(request)
}

fn encode_file_import_response(w: &mut Writer, response: &FileImportResponse) {
    w.uint32(1, response.id);
    match &response.result {
        Some(FileImportResult::FileUrl(url)) => w.string_always(2, url),
        Some(FileImportResult::Error(message)) => w.string_always(3, message),
        None => {}
    }
}

fn decode_file_import_response(mut r: Reader<'_>) -> Result<FileImportResponse, DecodeError> {
    let mut response = FileImportResponse {
        id: 0,
        result: None,
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => response.id = r.uint32(field, wt)?,
            2 => response.result = Some(FileImportResult::FileUrl(r.string(field, wt)?)),
            3 => response.result = Some(FileImportResult::Error(r.string(field, wt)?)),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Function callbacks
// ---------------------------------------------------------------------------

fn encode_function_call_request(w: &mut Writer, request: &FunctionCallRequest) {
    w.uint32(1, request.id);
    match &request.identifier {
        FunctionIdentifier::Name(name) => w.string_always(2, name),
        FunctionIdentifier::FunctionId(id) => w.uint32_always(3, *id),
    }
    for argument in &request.arguments {
        w.message(4, |w| encode_value(w, argument));
    }
}

fn decode_function_call_request(mut r: Reader<'_>) -> Result<FunctionCallRequest, DecodeError> {
    let mut id = 0;
    let mut identifier = None;
    let mut arguments = Vec::new();
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => id = r.uint32(field, wt)?,
            2 => identifier = Some(FunctionIdentifier::Name(r.string(field, wt)?)),
            3 => identifier = Some(FunctionIdentifier::FunctionId(r.uint32(field, wt)?)),
            4 => arguments.push(decode_value(r.sub(field, wt)?)?),
            _ => r.skip(field, wt)?,
        }
    }
    let identifier =
        identifier.ok_or_else(|| malformed("function call request carries no identifier"))?;
    Ok(FunctionCallRequest {
        id,
        identifier,
        arguments,
    })
}

fn encode_function_call_response(w: &mut Writer, response: &FunctionCallResponse) {
    w.uint32(1, response.id);
    match &response.result {
        FunctionCallResult::Success(value) => w.message(2, |w| encode_value(w, value)),
        FunctionCallResult::Error(message) => w.string_always(3, message),
    }
}

fn decode_function_call_response(mut r: Reader<'_>) -> Result<FunctionCallResponse, DecodeError> {
    let mut id = 0;
    let mut result = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => id = r.uint32(field, wt)?,
            2 => result = Some(FunctionCallResult::Success(decode_value(r.sub(field, wt)?)?)),
            3 => result = Some(FunctionCallResult::Error(r.string(field, wt)?)),
            _ => r.skip(field, wt)?,
        }
    }
    let result = result.ok_or_else(|| malformed("function call response carries no result"))?;
    Ok(FunctionCallResponse { id, result })
}

// ---------------------------------------------------------------------------
// Protocol errors and version handshake
// ---------------------------------------------------------------------------

fn encode_protocol_error(w: &mut Writer, error: &ProtocolError) {
    w.uint32(1, protocol_error_kind_to_wire(error.kind));
    w.uint32(2, error.id);
    w.string(3, &error.message);
}

fn decode_protocol_error(mut r: Reader<'_>) -> Result<ProtocolError, DecodeError> {
    let mut error = ProtocolError {
        kind: ProtocolErrorKind::Parse,
        id: PROTOCOL_ERROR_ID,
        message: String::new(),
    };
    let mut saw_id = false;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => error.kind = protocol_error_kind_from_wire(r.uint32(field, wt)?)?,
            2 => {
                error.id = r.uint32(field, wt)?;
                saw_id = true;
            }
            3 => error.message = r.string(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    if !saw_id {
        error.id = PROTOCOL_ERROR_ID;
    }
    Ok(error)
}

fn encode_version_response(w: &mut Writer, response: &VersionResponse) {
    w.uint32(1, response.id);
    w.string(2, &response.protocol_version);
    w.string(3, &response.compiler_version);
    w.string(4, &response.implementation_version);
    w.string(5, &response.implementation_name);
}

fn decode_version_response(mut r: Reader<'_>) -> Result<VersionResponse, DecodeError> {
    let mut response = VersionResponse {
        id: 0,
        protocol_version: String::new(),
        compiler_version: String::new(),
        implementation_version: String::new(),
        implementation_name: String::new(),
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => response.id = r.uint32(field, wt)?,
            2 => response.protocol_version = r.string(field, wt)?,
            3 => response.compiler_version = r.string(field, wt)?,
            4 => response.implementation_version = r.string(field, wt)?,
            5 => response.implementation_name = r.string(field, wt)?,
            _ => r.skip(field, wt)?,
        }
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

fn encode_number(w: &mut Writer, number: &ValNumber) {
    w.double(1, number.value);
    for unit in &number.numerators {
        w.string_always(2, unit);
    }
    for unit in &number.denominators {
        w.string_always(3, unit);
    }
}

fn decode_number(mut r: Reader<'_>) -> Result<ValNumber, DecodeError> {
    let mut number = ValNumber {
        value: 0.0,
        numerators: Vec::new(),
        denominators: Vec::new(),
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => number.value = r.double(field, wt)?,
            2 => number.numerators.push(r.string(field, wt)?),
            3 => number.denominators.push(r.string(field, wt)?),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(number)
}

fn encode_calc_value(w: &mut Writer, value: &CalcValue) {
    match value {
        CalcValue::Number(number) => w.message(1, |w| encode_number(w, number)),
        CalcValue::String(text) => w.string_always(2, text),
        CalcValue::Interpolation(text) => w.string_always(3, text),
        CalcValue::Operation(operation) => w.message(4, |w| {
            w.uint32(1, calc_operator_to_wire(operation.operator));
            w.message(2, |w| encode_calc_value(w, &operation.left));
            w.message(3, |w| encode_calc_value(w, &operation.right));
        }),
        CalcValue::Calculation(calculation) => w.message(5, |w| {
            encode_calculation(w, calculation);
        }),
    }
}

fn decode_calc_value(mut r: Reader<'_>) -> Result<CalcValue, DecodeError> {
    let mut value = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => value = Some(CalcValue::Number(decode_number(r.sub(field, wt)?)?)),
            2 => value = Some(CalcValue::String(r.string(field, wt)?)),
            3 => value = Some(CalcValue::Interpolation(r.string(field, wt)?)),
            4 => {
                let mut sub = r.sub(field, wt)?;
                let mut operator = None;
                let mut left = None;
                let mut right = None;
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => operator = Some(calc_operator_from_wire(sub.uint32(f, w)?)?),
                        2 => left = Some(decode_calc_value(sub.sub(f, w)?)?),
                        3 => right = Some(decode_calc_value(sub.sub(f, w)?)?),
                        _ => sub.skip(f, w)?,
                    }
                }
                let operation = CalcOperation {
                    operator: operator
                        .ok_or_else(|| malformed("calculation operation has no operator"))?,
                    left: left.ok_or_else(|| malformed("calculation operation has no lhs"))?,
                    right: right.ok_or_else(|| malformed("calculation operation has no rhs"))?,
                };
                value = Some(CalcValue::Operation(Box::new(operation)));
            }
            5 => value = Some(CalcValue::Calculation(decode_calculation(r.sub(field, wt)?)?)),
            _ => r.skip(field, wt)?,
        }
    }
    value.ok_or_else(|| malformed("calculation value carries no variant"))
}

fn encode_calculation(w: &mut Writer, calculation: &ValCalculation) {
    w.string(1, &calculation.name);
    for argument in &calculation.arguments {
        w.message(2, |w| encode_calc_value(w, argument));
    }
}

fn decode_calculation(mut r: Reader<'_>) -> Result<ValCalculation, DecodeError> {
    let mut calculation = ValCalculation {
        name: String::new(),
        arguments: Vec::new(),
    };
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => calculation.name = r.string(field, wt)?,
            2 => calculation.arguments.push(decode_calc_value(r.sub(field, wt)?)?),
            _ => r.skip(field, wt)?,
        }
    }
    Ok(calculation)
}

pub(crate) fn encode_value(w: &mut Writer, value: &Value) {
    match value {
        Value::String(string) => w.message(1, |w| {
            w.string(1, &string.text);
            w.boolean(2, string.quoted);
        }),
        Value::Number(number) => w.message(2, |w| encode_number(w, number)),
        Value::RgbColor(color) => w.message(3, |w| {
            w.double(1, color.red);
            w.double(2, color.green);
            w.double(3, color.blue);
            w.double(4, color.alpha);
        }),
        Value::List(list) => w.message(4, |w| {
            w.uint32(1, separator_to_wire(list.separator));
            w.boolean(2, list.has_brackets);
            for item in &list.contents {
                w.message(3, |w| encode_value(w, item));
            }
        }),
        Value::Map(map) => w.message(5, |w| {
            for (key, val) in &map.entries {
                w.message(1, |w| {
                    w.message(1, |w| encode_value(w, key));
                    w.message(2, |w| encode_value(w, val));
                });
            }
        }),
        Value::Singleton(singleton) => w.uint32_always(6, singleton_to_wire(*singleton)),
        Value::CompilerFunction(id) => w.message(7, |w| w.uint32(1, *id)),
        Value::HostFunction(function) => w.message(8, |w| {
            w.uint32(1, function.id);
            w.string(2, &function.signature);
        }),
        Value::ArgumentList(list) => w.message(9, |w| {
            w.uint32(1, list.id);
            w.uint32(2, separator_to_wire(list.separator));
            for item in &list.contents {
                w.message(3, |w| encode_value(w, item));
            }
            for (name, val) in &list.keywords {
                w.message(4, |w| {
                    w.string_always(1, name);
                    w.message(2, |w| encode_value(w, val));
                });
            }
        }),
        Value::Calculation(calculation) => w.message(10, |w| encode_calculation(w, calculation)),
    }
}

pub(crate) fn decode_value(mut r: Reader<'_>) -> Result<Value, DecodeError> {
    let mut value = None;
    while let Some((field, wt)) = r.next_tag()? {
        match field {
            1 => {
                let mut sub = r.sub(field, wt)?;
                let mut string = ValString {
                    text: String::new(),
                    quoted: false,
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => string.text = sub.string(f, w)?,
                        2 => string.quoted = sub.boolean(f, w)?,
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::String(string));
            }
            2 => value = Some(Value::Number(decode_number(r.sub(field, wt)?)?)),
            3 => {
                let mut sub = r.sub(field, wt)?;
                let mut color = ValColor {
                    red: 0.0,
                    green: 0.0,
                    blue: 0.0,
                    alpha: 0.0,
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => color.red = sub.double(f, w)?,
                        2 => color.green = sub.double(f, w)?,
                        3 => color.blue = sub.double(f, w)?,
                        4 => color.alpha = sub.double(f, w)?,
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::RgbColor(color));
            }
            4 => {
                let mut sub = r.sub(field, wt)?;
                let mut list = ValList {
                    separator: WireSeparator::Comma,
                    has_brackets: false,
                    contents: Vec::new(),
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => list.separator = separator_from_wire(sub.uint32(f, w)?)?,
                        2 => list.has_brackets = sub.boolean(f, w)?,
                        3 => list.contents.push(decode_value(sub.sub(f, w)?)?),
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::List(list));
            }
            5 => {
                let mut sub = r.sub(field, wt)?;
                let mut entries = Vec::new();
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => {
                            let mut entry = sub.sub(f, w)?;
                            let mut key = None;
                            let mut val = None;
                            while let Some((ef, ew)) = entry.next_tag()? {
                                match ef {
                                    1 => key = Some(decode_value(entry.sub(ef, ew)?)?),
                                    2 => val = Some(decode_value(entry.sub(ef, ew)?)?),
                                    _ => entry.skip(ef, ew)?,
                                }
                            }
                            entries.push((
                                key.ok_or_else(|| malformed("map entry has no key"))?,
                                val.ok_or_else(|| malformed("map entry has no value"))?,
                            ));
                        }
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::Map(ValMap { entries }));
            }
            6 => value = Some(Value::Singleton(singleton_from_wire(r.uint32(field, wt)?)?)),
            7 => {
                let mut sub = r.sub(field, wt)?;
                let mut id = 0;
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => id = sub.uint32(f, w)?,
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::CompilerFunction(id));
            }
            8 => {
                let mut sub = r.sub(field, wt)?;
                let mut function = ValHostFunction {
                    id: 0,
                    signature: String::new(),
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => function.id = sub.uint32(f, w)?,
                        2 => function.signature = sub.string(f, w)?,
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::HostFunction(function));
            }
            9 => {
                let mut sub = r.sub(field, wt)?;
                let mut list = ValArgumentList {
                    id: 0,
                    separator: WireSeparator::Comma,
                    contents: Vec::new(),
                    keywords: Vec::new(),
                };
                while let Some((f, w)) = sub.next_tag()? {
                    match f {
                        1 => list.id = sub.uint32(f, w)?,
                        2 => list.separator = separator_from_wire(sub.uint32(f, w)?)?,
                        3 => list.contents.push(decode_value(sub.sub(f, w)?)?),
                        4 => {
                            let mut entry = sub.sub(f, w)?;
                            let mut name = String::new();
                            let mut val = None;
                            while let Some((ef, ew)) = entry.next_tag()? {
                                match ef {
                                    1 => name = entry.string(ef, ew)?,
                                    2 => val = Some(decode_value(entry.sub(ef, ew)?)?),
                                    _ => entry.skip(ef, ew)?,
                                }
                            }
                            let val =
                                val.ok_or_else(|| malformed("keyword argument has no value"))?;
                            list.keywords.push((name, val));
                        }
                        _ => sub.skip(f, w)?,
                    }
                }
                value = Some(Value::ArgumentList(list));
            }
            10 => value = Some(Value::Calculation(decode_calculation(r.sub(field, wt)?)?)),
            _ => r.skip(field, wt)?,
        }
    }
    value.ok_or_else(|| malformed("value carries no variant"))
}
