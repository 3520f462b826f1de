//! CWIR lowering tests over the full front half of the pipeline:
//! lex -> parse -> desugar -> analyze -> emit.

use catlua_lexer::Lexer;
use catlua_parser::parse;
use catlua_sema::{analyze, desugar};

fn lower(source: &str) -> String {
    let outcome = parse(Lexer::tokenize(source).unwrap());
    let program = desugar(outcome.program.expect("parse"));
    let (program, analysis, diags) = analyze(program, 1);
    assert!(!diags.has_errors(), "analysis errors: {:?}", diags.errors().collect::<Vec<_>>());
    catlua_ir::emit(&program, &analysis)
}

fn lower_event(stmts: &str) -> String {
    lower(&format!("OnWebsiteLoaded\n{stmts}\nend"))
}

#[test]
fn header_and_script_framing() {
    let ir = lower_event("x = 1");
    assert!(ir.starts_with("CWIR_VERSION 1.0\n"));
    assert!(ir.contains("\nSCRIPT\n"));
    assert!(ir.contains("END_SCRIPT"));
    assert!(ir.contains("EVENT LOADED"));
    assert!(ir.contains("END_EVENT"));
}

#[test]
fn folded_constant_assignment() {
    // S1: the folded RHS lands as a single literal.
    let ir = lower_event("local x = 1 + 2 * 3");
    assert!(ir.contains("VAR_SET \"l!x\" \"7\""), "ir was:\n{ir}");
}

#[test]
fn nil_test_lowers_to_exists_opcodes() {
    // S2 shape.
    let ir = lower_event("if a == nil then\nprint(\"x\")\nend");
    let pos_if = ir.find("IF_NOT_EXISTS \"g!a\"").expect("IF_NOT_EXISTS");
    let pos_log = ir.find("LOG \"x\"").expect("LOG");
    let pos_end = ir.find("END_IF").expect("END_IF");
    assert!(pos_if < pos_log && pos_log < pos_end);

    let ir = lower_event("if a ~= nil then\nend");
    assert!(ir.contains("IF_EXISTS \"g!a\""));
}

#[test]
fn pairs_loop_rewrites_iteration_variables() {
    // S3: the key/value names become the runtime's magic locals.
    let ir = lower_event("for k, v in pairs(t) do\nprint(v)\nend");
    assert!(ir.contains("TABLE_ITER \"g!t\""), "ir was:\n{ir}");
    assert!(ir.contains("LOG \"{l!value}\""), "ir was:\n{ir}");
    assert!(ir.contains("END_ITER"));
}

#[test]
fn compound_assignment_opcodes() {
    let ir = lower_event("x = 10\nx += 2\nx /= 4");
    assert!(ir.contains("VAR_SET \"g!x\" \"10\""));
    assert!(ir.contains("VAR_INC \"g!x\" \"2\""));
    assert!(ir.contains("VAR_DIV \"g!x\" \"4\""));
}

#[test]
fn concat_assignment_is_direct() {
    let ir = lower_event("x = \"a\" .. \"b\"");
    assert!(ir.contains("STR_CONCAT \"a\" \"b\" \"g!x\""));
}

#[test]
fn scaffolding_seeds_and_reuses_temporaries() {
    let ir = lower_event("local x = y + 1");
    // The literal gets its own temporary, y seeds a second one, the add
    // applies in place, then x copies the result.
    assert!(ir.contains("VAR_SET \"l!__tmp1\" \"1\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_SET \"l!__tmp2\" \"{g!y}\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_INC \"l!__tmp2\" \"{l!__tmp1}\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_SET \"l!x\" \"{l!__tmp2}\""), "ir was:\n{ir}");
}

#[test]
fn temporaries_reset_per_event() {
    let source = "OnWebsiteLoaded\nlocal a = y + 1\nend\nOnWebsiteLoaded\nlocal b = y + 1\nend";
    let ir = lower(source);
    // Each event restarts at __tmp1; nothing carries over.
    assert!(!ir.contains("__tmp3"), "ir was:\n{ir}");
    assert_eq!(ir.matches("VAR_SET \"l!__tmp1\" \"1\"").count(), 2, "ir was:\n{ir}");
}

#[test]
fn unary_minus_on_complex_expression() {
    let ir = lower_event("x = 1\ny = -(x)");
    // Negating a non-literal seeds zero and subtracts.
    assert!(ir.contains("VAR_SET \"l!__tmp1\" \"0\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_DEC \"l!__tmp1\" \"{g!x}\""), "ir was:\n{ir}");
}

#[test]
fn negated_literal_has_direct_form() {
    let ir = lower_event("x = -5");
    assert!(ir.contains("VAR_SET \"g!x\" \"-5\""));
}

#[test]
fn table_operations() {
    let ir = lower_event("t = {}\nt[\"k\"] = 1\nx = t[\"k\"]\nn = #t\nt.insert(5)\nt.remove(1)");
    assert!(ir.contains("TABLE_CREATE \"g!t\""));
    assert!(ir.contains("TABLE_SET \"k\" \"g!t\" \"1\""));
    assert!(ir.contains("TABLE_GET \"k\" \"g!t\" \"g!x\""));
    assert!(ir.contains("TABLE_LEN \"g!t\" \"g!n\""));
    assert!(ir.contains("TABLE_INSERT \"5\" EMPTY \"g!t\""));
    assert!(ir.contains("TABLE_REMOVE \"1\" \"g!t\""));
}

#[test]
fn element_property_access() {
    let ir = lower_event("Label.Text = \"hi\"\nx = Frame.Visible\nFrame.Parent = Card");
    assert!(ir.contains("LOOK_SET_TEXT (Label) \"hi\""));
    assert!(ir.contains("LOOK_GET_PROP \"Visible\" (Frame) \"g!x\""));
    assert!(ir.contains("HIER_PARENT (Frame) (Card)"));
}

#[test]
fn audio_annotation_selects_avar_opcodes() {
    let ir = lower_event("--@ type=object\ntrack = Song\n--@ type=audio\ntrack.Volume = 2\n--@ type=audio\nv = track.Volume");
    assert!(ir.contains("AVAR_SET \"Volume\" \"g!track\" \"2\""), "ir was:\n{ir}");
    assert!(ir.contains("AVAR_GET \"Volume\" \"g!track\" \"g!v\""), "ir was:\n{ir}");
}

#[test]
fn input_text_read() {
    let ir = lower_event("txt = Box.Text");
    assert!(ir.contains("INPUT_GET_TEXT (Box) \"g!txt\""));
}

#[test]
fn local_player_getters() {
    let ir = lower_event("n = LocalPlayer.Name\ni = LocalPlayer.UserId\nd = LocalPlayer.DisplayName");
    assert!(ir.contains("USER_GET_NAME \"g!n\""));
    assert!(ir.contains("USER_GET_ID \"g!i\""));
    assert!(ir.contains("USER_GET_DISPLAY \"g!d\""));
}

#[test]
fn cursor_and_viewport_queries() {
    let ir = lower_event(
        "input = UserInputService\nx, y = input.GetMouseLocation()\nw, h = Camera.ViewportSize",
    );
    assert!(ir.contains("INPUT_GET_CURSOR \"g!x\" \"g!y\""), "ir was:\n{ir}");
    assert!(ir.contains("INPUT_GET_VIEWPORT \"g!w\" \"g!h\""), "ir was:\n{ir}");
}

#[test]
fn alias_assignment_emits_nothing() {
    let ir = lower_event("input = UserInputService");
    assert!(!ir.contains("VAR_SET"), "ir was:\n{ir}");
}

#[test]
fn builtin_calls_lower_through_the_table() {
    let ir = lower_event("print(\"hi\")\nwait(2)\nmakeVisible(Frame)\nx = string.len(s)");
    assert!(ir.contains("LOG \"hi\""));
    assert!(ir.contains("WAIT \"2\""));
    assert!(ir.contains("LOOK_SHOW (Frame)"));
    assert!(ir.contains("STR_LEN \"{g!s}\" \"g!x\""));
}

#[test]
fn wait_default_argument() {
    let ir = lower_event("wait()");
    assert!(ir.contains("WAIT \"0\""));
}

#[test]
fn math_lowerings() {
    let ir = lower_event("r = math.random(1, 6)\nf = math.floor(2.7)\ns = math.sqrt(9)");
    assert!(ir.contains("VAR_RANDOM \"g!r\" \"1\" \"6\""));
    assert!(ir.contains("VAR_SET \"g!f\" \"2.7\""));
    assert!(ir.contains("VAR_FLOOR \"g!f\""));
    assert!(ir.contains("MATH_RUN \"sqrt\" [\"9\"] \"g!s\""));
}

#[test]
fn string_library_lowerings() {
    let ir = lower_event("s = \"abc\"\nstring.sub(s, 1, 2)\nstring.gsub(s, \"a\", \"b\")");
    assert!(ir.contains("STR_SUB \"g!s\" \"1\" \"2\""));
    assert!(ir.contains("STR_REPLACE \"a\" \"g!s\" \"b\""));
}

#[test]
fn broadcast_family() {
    let ir = lower_event("page.broadcast(\"m\")\ncrossSite.broadcast(\"m\", \"site\")");
    assert!(ir.contains("NET_BROADCAST_PAGE \"m\""));
    assert!(ir.contains("NET_BROADCAST_CROSSSITE \"m\" \"site\""));
}

#[test]
fn user_function_calls() {
    let source = "function greet(who)\nprint(who)\nend\n\
                  OnWebsiteLoaded\ngreet(\"cat\")\nbg greet(\"dog\")\nok, res = protected greet(\"owl\")\nend";
    let ir = lower(source);
    assert!(ir.contains("EVENT FUNC_DEF \"greet\" [\"who\"]"));
    assert!(ir.contains("FUNC_RUN \"greet\" [\"cat\"] EMPTY"));
    assert!(ir.contains("FUNC_RUN_BG \"greet\" [\"dog\"]"));
    assert!(ir.contains("FUNC_RUN_PROTECTED \"greet\" [\"owl\"] \"g!ok\" \"g!res\""));
}

#[test]
fn builtin_annotation_overrides_user_function() {
    let source = "function print(x)\nend\nOnWebsiteLoaded\n--@ builtin\nprint(\"hi\")\nprint(\"there\")\nend";
    let ir = lower(source);
    assert!(ir.contains("LOG \"hi\""), "ir was:\n{ir}");
    assert!(ir.contains("FUNC_RUN \"print\" [\"there\"] EMPTY"), "ir was:\n{ir}");
}

#[test]
fn if_chain_emits_else_and_balanced_ends() {
    let ir = lower_event("if a == 1 then\nx = 1\nelseif a == 2 then\nx = 2\nelse\nx = 3\nend");
    assert!(ir.contains("IF_EQ \"{g!a}\" \"1\""));
    assert!(ir.contains("IF_EQ \"{g!a}\" \"2\""));
    assert_eq!(ir.matches("ELSE").count(), 2);
    assert_eq!(ir.matches("END_IF").count(), 2);
}

#[test]
fn relational_and_logical_conditions() {
    let ir = lower_event("if a > 2 then\nend\nif a and b then\nend\nif s contains \"x\" then\nend");
    assert!(ir.contains("IF_GT \"{g!a}\" \"2\""));
    assert!(ir.contains("IF_AND \"g!a\" \"g!b\""));
    assert!(ir.contains("IF_CONTAINS \"{g!s}\" \"x\""));
}

#[test]
fn input_predicates() {
    let ir = lower_event("if keyDown(\"Q\") then\nend\nif leftMouseDown() then\nend");
    assert!(ir.contains("IF_KEY_DOWN \"Q\""));
    assert!(ir.contains("IF_MOUSE_LEFT"));
}

#[test]
fn string_find_condition() {
    let ir = lower_event("if string.find(a, \"x\") then\nend");
    assert!(ir.contains("IF_CONTAINS \"{g!a}\" \"x\""));
}

#[test]
fn truthiness_condition_falls_back_to_neq_empty() {
    let ir = lower_event("x = 1\nif x then\nend");
    assert!(ir.contains("IF_NEQ \"{g!x}\" EMPTY"));
}

#[test]
fn repeat_forms() {
    let ir = lower_event("repeat 3\nbreak\nend\nrepeat forever\nend");
    assert!(ir.contains("REPEAT \"3\""));
    assert!(ir.contains("BREAK"));
    assert!(ir.contains("REPEAT_FOREVER"));
    assert_eq!(ir.matches("END_REPEAT").count(), 2);
}

#[test]
fn delete_forms() {
    let ir = lower_event("x = 1\ndelete x\ndelete Frame\nt = {}\ndelete t[\"k\"]");
    assert!(ir.contains("VAR_DEL \"g!x\""));
    assert!(ir.contains("LOOK_DELETE (Frame)"));
    assert!(ir.contains("TABLE_DEL \"k\" \"g!t\""));
}

#[test]
fn comments_become_comment_actions() {
    let ir = lower_event("-- setup phase\nx = 1");
    assert!(ir.contains("COMMENT \"setup phase\""));
}

#[test]
fn audio_transport_methods() {
    let ir = lower_event("track = Song\ntrack.Stop()\ntrack.Pause()");
    assert!(ir.contains("AUDIO_STOP \"g!track\""));
    assert!(ir.contains("AUDIO_PAUSE \"g!track\""));
}

#[test]
fn event_header_dispatch() {
    let source = "Button.MouseButton1Click\nend\nFrame.InputBegan(\"Q\")\nend\nPanel.FocusLost\nend\nCustomThing.Changed\nend";
    let ir = lower(source);
    assert!(ir.contains("EVENT PRESSED (Button)"));
    assert!(ir.contains("EVENT KEY_PRESSED \"Q\""));
    assert!(ir.contains("EVENT INPUT_SUBMIT (Panel)"));
    assert!(ir.contains("EVENT CHANGED (CustomThing)"));
}

#[test]
fn script_alias_line() {
    let ir = lower("--@ script_alias = \"menu\"\nOnWebsiteLoaded\nend");
    assert!(ir.contains("SCRIPT_ALIAS \"menu\""));
}

#[test]
fn or_default_desugars_before_lowering() {
    let ir = lower_event("x = a or b");
    // Base assignment, then the guard with the fallback inside.
    assert!(ir.contains("VAR_SET \"g!x\" \"{g!a}\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_SET \"g!x\" \"{g!b}\""), "ir was:\n{ir}");
    assert!(ir.contains("END_IF"));
}

#[test]
fn return_with_and_without_value() {
    let source = "function f()\nreturn 1\nend\nfunction g()\nreturn\nend\nOnWebsiteLoaded\nend";
    let ir = lower(source);
    assert!(ir.contains("RETURN \"1\""));
    assert!(ir.contains("RETURN EMPTY"));
}

#[test]
fn hierarchy_queries() {
    let ir = lower_event("kids = getChildren(Frame)\nc = findFirstChild(Frame, \"Card\")");
    assert!(ir.contains("HIER_GET_CHILDREN (Frame) \"g!kids\""));
    assert!(ir.contains("HIER_FIND_CHILD \"Card\" (Frame) \"g!c\""));
}

#[test]
fn tween_lowering() {
    let ir = lower_event("tween(Frame, \"Size\", \"10\", 2, \"Linear\", \"Out\")");
    assert!(ir.contains("LOOK_TWEEN \"Size\" (Frame) \"10\" \"2\" \"Linear\" \"Out\""));
}

#[test]
fn calls_inside_expressions_get_output_temporaries() {
    let ir = lower_event("x = 1 + string.len(s)");
    // The literal takes __tmp1, the inner call writes __tmp2, and the add
    // folds the call result into the literal's temporary.
    assert!(ir.contains("VAR_SET \"l!__tmp1\" \"1\""), "ir was:\n{ir}");
    assert!(ir.contains("STR_LEN \"{g!s}\" \"l!__tmp2\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_INC \"l!__tmp1\" \"{l!__tmp2}\""), "ir was:\n{ir}");
    assert!(ir.contains("VAR_SET \"g!x\" \"{l!__tmp1}\""), "ir was:\n{ir}");
}
