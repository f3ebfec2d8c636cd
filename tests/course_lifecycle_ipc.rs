use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_coursebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

/// Bootstraps the workspace's admin, then an instructor and a student.
/// Returns (admin, instructor, student) user ids.
fn setup_people(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let admin = request_ok(
        stdin,
        reader,
        "p1",
        "users.create",
        json!({ "role": "admin", "name": "Root Admin", "email": "root@example.edu" }),
    )["userId"]
        .as_str()
        .expect("admin id")
        .to_string();
    let instructor = request_ok(
        stdin,
        reader,
        "p2",
        "users.create",
        json!({
            "actorId": admin,
            "role": "instructor",
            "name": "Prof Varma",
            "email": "varma@example.edu",
            "rollNumber": "EMP-104"
        }),
    )["userId"]
        .as_str()
        .expect("instructor id")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "p3",
        "users.create",
        json!({
            "actorId": admin,
            "role": "student",
            "name": "Nila",
            "email": "nila@example.edu",
            "rollNumber": "21CS001"
        }),
    )["userId"]
        .as_str()
        .expect("student id")
        .to_string();
    (admin, instructor, student)
}

#[test]
fn first_user_must_be_an_admin() {
    let workspace = temp_dir("coursebook-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "role": "student", "name": "Too Early" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Once the admin exists, creating users requires an admin actor.
    let (_admin, _instructor, student) = setup_people(&mut stdin, &mut reader);
    let denied = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "actorId": student, "role": "student", "name": "Friend", "rollNumber": "21CS777" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
}

#[test]
fn duplicate_email_and_roll_number_conflict() {
    let workspace = temp_dir("coursebook-user-dupes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (admin, _instructor, _student) = setup_people(&mut stdin, &mut reader);

    let dup_email = request(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "actorId": admin,
            "role": "student",
            "name": "Copy",
            "email": "nila@example.edu",
            "rollNumber": "21CS900"
        }),
    );
    assert_eq!(error_code(&dup_email), "conflict");

    let dup_roll = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "actorId": admin,
            "role": "student",
            "name": "Copy",
            "rollNumber": "21CS001"
        }),
    );
    assert_eq!(error_code(&dup_roll), "conflict");
}

#[test]
fn each_role_has_its_required_identifier() {
    let workspace = temp_dir("coursebook-user-fields");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (admin, _instructor, _student) = setup_people(&mut stdin, &mut reader);

    // Students and instructors are addressed by roll number.
    let no_roll_student = request(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "actorId": admin, "role": "student", "name": "Rollless" }),
    );
    assert_eq!(error_code(&no_roll_student), "bad_params");
    let no_roll_instructor = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "actorId": admin,
            "role": "instructor",
            "name": "Adjunct",
            "email": "adjunct@example.edu"
        }),
    );
    assert_eq!(error_code(&no_roll_instructor), "bad_params");

    // Admins are addressed by email.
    let no_email_admin = request(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "actorId": admin, "role": "admin", "name": "Second Admin" }),
    );
    assert_eq!(error_code(&no_email_admin), "bad_params");
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({
            "actorId": admin,
            "role": "admin",
            "name": "Second Admin",
            "email": "admin2@example.edu"
        }),
    );
}

#[test]
fn course_creation_is_instructor_only_and_codes_are_unique() {
    let workspace = temp_dir("coursebook-course-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, student) = setup_people(&mut stdin, &mut reader);

    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "actorId": student, "code": "CS101", "name": "Intro" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({
            "actorId": instructor,
            "code": "CS101",
            "name": "Intro to Programming",
            "credits": 4
        }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "actorId": instructor, "code": "CS101", "name": "Other" }),
    );
    assert_eq!(error_code(&dup), "conflict");
}

#[test]
fn enrollment_and_mine_roundtrip() {
    let workspace = temp_dir("coursebook-enroll");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, student) = setup_people(&mut stdin, &mut reader);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "actorId": instructor, "code": "CS201", "name": "Data Structures" }),
    )["courseId"]
        .as_str()
        .expect("course id")
        .to_string();

    // Instructors never enroll in their own courses.
    let denied = request(
        &mut stdin,
        &mut reader,
        "3",
        "courses.enroll",
        json!({ "actorId": instructor, "courseId": course }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "5",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.mine",
        json!({ "actorId": student }),
    );
    let courses = mine["courses"].as_array().expect("courses array");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["code"].as_str(), Some("CS201"));
    assert_eq!(courses[0]["instructorName"].as_str(), Some("Prof Varma"));
}

#[test]
fn detail_hides_content_from_outsiders() {
    let workspace = temp_dir("coursebook-detail-views");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (admin, instructor, student) = setup_people(&mut stdin, &mut reader);
    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "actorId": admin, "role": "student", "name": "Visitor", "rollNumber": "21CS555" }),
    )["userId"]
        .as_str()
        .expect("outsider id")
        .to_string();

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "actorId": instructor, "code": "CS301", "name": "Algorithms" }),
    )["courseId"]
        .as_str()
        .expect("course id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );
    // Course-global media (no week attached).
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "media.create",
        json!({
            "actorId": instructor,
            "courseId": course,
            "title": "Syllabus",
            "fileUrl": "files/syllabus.pdf",
            "mediaType": "document"
        }),
    );

    let enrolled_view = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.detail",
        json!({ "actorId": student, "courseId": course }),
    );
    assert_eq!(enrolled_view["enrolledCount"].as_i64(), Some(1));
    assert_eq!(
        enrolled_view["mediaItems"].as_array().map(|a| a.len()),
        Some(1)
    );

    let outsider_view = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.detail",
        json!({ "actorId": outsider, "courseId": course }),
    );
    assert_eq!(outsider_view["name"].as_str(), Some("Algorithms"));
    assert_eq!(
        outsider_view["mediaItems"].as_array().map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn weeks_are_unique_per_course_and_listed_in_order() {
    let workspace = temp_dir("coursebook-weeks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, student) = setup_people(&mut stdin, &mut reader);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "actorId": instructor, "code": "CS401", "name": "Compilers" }),
    )["courseId"]
        .as_str()
        .expect("course id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "weeks.create",
        json!({ "actorId": instructor, "courseId": course, "weekNumber": 2, "title": "Parsing" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "weeks.create",
        json!({ "actorId": instructor, "courseId": course, "weekNumber": 1, "title": "Lexing" }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "6",
        "weeks.create",
        json!({ "actorId": instructor, "courseId": course, "weekNumber": 1, "title": "Again" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "weeks.list",
        json!({ "actorId": student, "courseId": course }),
    );
    let weeks = listed["weeks"].as_array().expect("weeks array");
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0]["weekNumber"].as_i64(), Some(1));
    assert_eq!(weeks[0]["title"].as_str(), Some("Lexing"));
    assert_eq!(weeks[1]["weekNumber"].as_i64(), Some(2));
}

#[test]
fn deleting_a_week_detaches_its_content() {
    let workspace = temp_dir("coursebook-week-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, student) = setup_people(&mut stdin, &mut reader);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "actorId": instructor, "code": "CS501", "name": "Databases" }),
    )["courseId"]
        .as_str()
        .expect("course id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );
    let week = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "weeks.create",
        json!({ "actorId": instructor, "courseId": course, "weekNumber": 1, "title": "SQL" }),
    )["weekId"]
        .as_str()
        .expect("week id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "media.create",
        json!({
            "actorId": instructor,
            "courseId": course,
            "weekId": week,
            "title": "Joins lecture",
            "fileUrl": "files/joins.mp4",
            "mediaType": "video",
            "durationSeconds": 600
        }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "weeks.delete",
        json!({ "actorId": instructor, "weekId": week }),
    );

    // The video is still there, now at the course level.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.detail",
        json!({ "actorId": student, "courseId": course }),
    );
    assert_eq!(detail["weeks"].as_array().map(|a| a.len()), Some(0));
    let media = detail["mediaItems"].as_array().expect("media array");
    assert_eq!(media.len(), 1);
    assert_eq!(media[0]["title"].as_str(), Some("Joins lecture"));
}

#[test]
fn course_delete_cascades_and_reports_removed_files() {
    let workspace = temp_dir("coursebook-course-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, student) = setup_people(&mut stdin, &mut reader);

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({
            "actorId": instructor,
            "code": "CS601",
            "name": "Networks",
            "thumbnail": "files/net-thumb.png"
        }),
    )["courseId"]
        .as_str()
        .expect("course id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.enroll",
        json!({ "actorId": student, "courseId": course }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "media.create",
        json!({
            "actorId": instructor,
            "courseId": course,
            "title": "Intro video",
            "fileUrl": "files/net-intro.mp4",
            "mediaType": "video",
            "durationSeconds": 300
        }),
    );
    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.create",
        json!({
            "actorId": instructor,
            "courseId": course,
            "title": "Socket lab",
            "deadline": "2030-01-01T00:00:00+00:00"
        }),
    )["assignmentId"]
        .as_str()
        .expect("assignment id")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.submit",
        json!({
            "actorId": student,
            "assignmentId": assignment,
            "fileUrl": "files/lab-nila.zip"
        }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "7",
        "courses.delete",
        json!({ "actorId": student, "courseId": course }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.delete",
        json!({ "actorId": instructor, "courseId": course }),
    );
    let mut removed: Vec<String> = result["removedFiles"]
        .as_array()
        .expect("removedFiles")
        .iter()
        .map(|v| v.as_str().expect("file url").to_string())
        .collect();
    removed.sort();
    assert_eq!(
        removed,
        vec![
            "files/lab-nila.zip".to_string(),
            "files/net-intro.mp4".to_string(),
            "files/net-thumb.png".to_string(),
        ]
    );

    let gone = request(
        &mut stdin,
        &mut reader,
        "9",
        "courses.detail",
        json!({ "actorId": instructor, "courseId": course }),
    );
    assert_eq!(error_code(&gone), "not_found");
}

#[test]
fn course_list_paginates_newest_first() {
    let workspace = temp_dir("coursebook-course-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_admin, instructor, _student) = setup_people(&mut stdin, &mut reader);

    for i in 0..3 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "courses.create",
            json!({
                "actorId": instructor,
                "code": format!("CS10{}", i),
                "name": format!("Course {}", i)
            }),
        );
        // created_at is the pagination cursor, so the rows need distinct stamps
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let page1 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.list",
        json!({ "limit": 2 }),
    );
    let courses = page1["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 2);
    assert_eq!(courses[0]["code"].as_str(), Some("CS102"));
    assert_eq!(courses[1]["code"].as_str(), Some("CS101"));
    let cursor = page1["nextCursor"].as_str().expect("cursor").to_string();

    let page2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.list",
        json!({ "limit": 2, "cursor": cursor }),
    );
    let courses = page2["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["code"].as_str(), Some("CS100"));
    assert!(page2["nextCursor"].is_null());
}
