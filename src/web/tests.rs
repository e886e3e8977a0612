use std::sync::Arc;
use std::time::Instant;

use salvo::prelude::*;
use salvo::test::{ResponseExt, TestClient};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::auth::{TokenIssuer, hash_password};
use crate::config::{DatabaseConfig, PaginationConfig, UploadsConfig};
use crate::db::{DatabaseManager, NewSubject, NewUser, Role, User};
use crate::media::MediaStorage;
use crate::web::WebState;
use crate::web::routes::create_service;

const BASE: &str = "http://127.0.0.1:3001";
const PASSWORD: &str = "correct-horse";

struct TestApp {
    dir: TempDir,
    state: WebState,
    service: Service,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("cms.db").to_string_lossy().to_string();
        let db_manager = DatabaseManager::new(&DatabaseConfig::for_path(db_path))
            .await
            .expect("open database");
        db_manager.migrate().await.expect("migrate");

        let uploads = UploadsConfig {
            dir: dir.path().join("uploads"),
            max_file_size: 1024,
            ..UploadsConfig::default()
        };
        let state = WebState {
            db_manager: Arc::new(db_manager),
            tokens: Arc::new(TokenIssuer::new("test-secret-0123456789", 1)),
            media: Arc::new(MediaStorage::new(&uploads)),
            pagination: PaginationConfig::default(),
            started_at: Instant::now(),
        };
        state.media.ensure_dir().await.expect("uploads dir");
        let service = create_service(state.clone(), &[]);

        Self { dir, state, service }
    }

    async fn user(&self, username: &str, role: Role, subject: Option<i64>) -> (User, String) {
        let user = self
            .state
            .db_manager
            .user_store()
            .create_user(&NewUser {
                username: username.to_string(),
                password_hash: hash_password(PASSWORD).expect("hash"),
                role,
                assigned_subject_id: subject,
            })
            .await
            .expect("create user");
        let token = self.state.tokens.issue(&user).expect("token");
        (user, token)
    }

    async fn subject(&self, name: &str) -> i64 {
        self.state
            .db_manager
            .subject_store()
            .create_subject(&NewSubject {
                name: name.to_string(),
                description: None,
            })
            .await
            .expect("create subject")
            .id
    }

    /// Creates a post as `token` and attaches one text file to it.
    async fn post_with_file(&self, token: &str, title: &str) -> (i64, i64, String) {
        let mut res = TestClient::post(url("/api/content"))
            .bearer_auth(token)
            .json(&json!({ "title": title, "type": "material" }))
            .send(&self.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let content_id = json_of(&mut res).await["id"].as_i64().expect("id");

        let (content_type, body) = multipart("notes.txt", "text/plain", "notes");
        let mut res = TestClient::post(url(&format!("/api/content/{content_id}/files")))
            .bearer_auth(token)
            .add_header("content-type", content_type, true)
            .body(body)
            .send(&self.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
        let uploaded = json_of(&mut res).await;
        let file_id = uploaded["files"][0]["id"].as_i64().expect("file id");
        let stored = uploaded["files"][0]["stored_filename"]
            .as_str()
            .expect("stored name")
            .to_string();
        (content_id, file_id, stored)
    }
}

fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

async fn json_of(res: &mut Response) -> Value {
    res.take_json::<Value>().await.expect("json body")
}

fn multipart(filename: &str, mime: &str, data: &str) -> (String, String) {
    let boundary = "school-cms-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
         Content-Type: {mime}\r\n\r\n\
         {data}\r\n--{boundary}--\r\n"
    );
    (format!("multipart/form-data; boundary={boundary}"), body)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let mut res = TestClient::get(url("/api/health")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body = json_of(&mut res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn login_issues_token_and_rejects_bad_credentials() {
    let app = TestApp::new().await;
    app.user("principal", Role::Admin, None).await;

    let mut res = TestClient::post(url("/api/auth/login"))
        .json(&json!({ "username": "principal", "password": PASSWORD }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body = json_of(&mut res).await;
    let token = body["token"].as_str().expect("token").to_string();
    assert_eq!(body["user"]["role"], "admin");
    assert!(body["user"].get("password_hash").is_none());

    let mut res = TestClient::get(url("/api/auth/me"))
        .bearer_auth(&token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    assert_eq!(json_of(&mut res).await["username"], "principal");

    for (username, password) in [("principal", "wrong-password"), ("nobody", PASSWORD)] {
        let mut res = TestClient::post(url("/api/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(json_of(&mut res).await["error"], "invalid username or password");
    }
}

#[tokio::test]
async fn bad_tokens_are_rejected_even_on_public_routes() {
    let app = TestApp::new().await;

    let res = TestClient::get(url("/api/auth/me")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));

    let mut res = TestClient::get(url("/api/subjects"))
        .bearer_auth("not-a-jwt")
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
    assert_eq!(json_of(&mut res).await["error"], "invalid or expired token");

    let res = TestClient::get(url("/api/subjects")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
}

#[tokio::test]
async fn token_of_deleted_user_stops_working() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let (student, student_token) = app.user("pupil", Role::Student, None).await;

    let res = TestClient::delete(url(&format!("/api/users/{}", student.id)))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));

    let res = TestClient::get(url("/api/auth/me"))
        .bearer_auth(&student_token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn user_management_is_admin_only() {
    let app = TestApp::new().await;
    let (admin, admin_token) = app.user("principal", Role::Admin, None).await;
    let (_, teacher_token) = app.user("teacher1", Role::Teacher, None).await;
    let subject_id = app.subject("Physics").await;

    let res = TestClient::get(url("/api/users"))
        .bearer_auth(&teacher_token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let create = json!({
        "username": "teacher2",
        "password": "long-enough",
        "role": "teacher",
        "assigned_subject_id": subject_id,
    });
    let mut res = TestClient::post(url("/api/users"))
        .bearer_auth(&admin_token)
        .json(&create)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let created = json_of(&mut res).await;
    assert_eq!(created["assigned_subject_id"], subject_id);

    let res = TestClient::post(url("/api/users"))
        .bearer_auth(&admin_token)
        .json(&create)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

    let res = TestClient::post(url("/api/users"))
        .bearer_auth(&admin_token)
        .json(&json!({ "username": "x", "password": "long-enough", "role": "student" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let mut res = TestClient::put(url(&format!("/api/users/{}", created["id"])))
        .bearer_auth(&admin_token)
        .json(&json!({ "assigned_subject_id": null }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    assert_eq!(json_of(&mut res).await["assigned_subject_id"], Value::Null);

    let res = TestClient::put(url(&format!("/api/users/{}", admin.id)))
        .bearer_auth(&admin_token)
        .json(&json!({ "role": "teacher" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

    let res = TestClient::delete(url(&format!("/api/users/{}", admin.id)))
        .bearer_auth(&admin_token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let mut res = TestClient::get(url("/api/users?role=teacher"))
        .bearer_auth(&admin_token)
        .send(&app.service)
        .await;
    let page = json_of(&mut res).await;
    assert_eq!(page["pagination"]["total"], 2);
}

#[tokio::test]
async fn subjects_are_public_to_read_and_admin_to_write() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let (_, teacher) = app.user("teacher1", Role::Teacher, None).await;

    let res = TestClient::post(url("/api/subjects"))
        .bearer_auth(&teacher)
        .json(&json!({ "name": "Chemistry" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let res = TestClient::post(url("/api/subjects"))
        .json(&json!({ "name": "Chemistry" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::UNAUTHORIZED));

    let mut res = TestClient::post(url("/api/subjects"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "  Chemistry ", "description": "Labs" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let subject = json_of(&mut res).await;
    assert_eq!(subject["name"], "Chemistry");

    let res = TestClient::post(url("/api/subjects"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "Chemistry" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));

    let mut res = TestClient::get(url("/api/subjects")).send(&app.service).await;
    let list = json_of(&mut res).await;
    assert_eq!(list[0]["content_count"], 0);

    let res = TestClient::get(url("/api/subjects/abc")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let res = TestClient::get(url("/api/subjects/999")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn teachers_publish_within_their_subject() {
    let app = TestApp::new().await;
    let maths = app.subject("Maths").await;
    let history = app.subject("History").await;
    let (teacher, teacher_token) = app.user("teacher1", Role::Teacher, Some(maths)).await;
    let (_, other_token) = app.user("teacher2", Role::Teacher, Some(maths)).await;
    let (_, student_token) = app.user("pupil", Role::Student, Some(maths)).await;

    let mut res = TestClient::post(url("/api/content"))
        .bearer_auth(&teacher_token)
        .json(&json!({ "title": "Exam prep", "body": "Chapters 1-3", "type": "preparation" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let post = json_of(&mut res).await;
    assert_eq!(post["subject_id"], maths);
    assert_eq!(post["author_id"], teacher.id);
    assert_eq!(post["type"], "preparation");
    let post_url = url(&format!("/api/content/{}", post["id"]));

    let res = TestClient::post(url("/api/content"))
        .bearer_auth(&teacher_token)
        .json(&json!({ "title": "Wrong room", "subject_id": history }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let res = TestClient::post(url("/api/content"))
        .bearer_auth(&student_token)
        .json(&json!({ "title": "Hi" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let res = TestClient::put(&post_url)
        .bearer_auth(&other_token)
        .json(&json!({ "title": "Hijacked" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let res = TestClient::put(&post_url)
        .bearer_auth(&teacher_token)
        .json(&json!({ "subject_id": history }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let mut res = TestClient::put(&post_url)
        .bearer_auth(&teacher_token)
        .json(&json!({ "title": "Exam prep (updated)" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    assert_eq!(json_of(&mut res).await["title"], "Exam prep (updated)");

    let mut res = TestClient::get(url(&format!("/api/content?subject_id={maths}&type=preparation")))
        .send(&app.service)
        .await;
    let page = json_of(&mut res).await;
    assert_eq!(page["pagination"]["total"], 1);

    let res = TestClient::get(url("/api/content?type=homework")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let res = TestClient::delete(&post_url)
        .bearer_auth(&teacher_token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let res = TestClient::get(&post_url).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn search_validates_and_matches_literally() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    for title in ["100% attendance", "1000 attendance", "Sports day"] {
        let res = TestClient::post(url("/api/content"))
            .bearer_auth(&admin)
            .json(&json!({ "title": title }))
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::CREATED));
    }

    let res = TestClient::get(url("/api/search?q=%20%20")).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let long = "a".repeat(101);
    let res = TestClient::get(url(&format!("/api/search?q={long}"))).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let mut res = TestClient::get(url("/api/search?q=100%25")).send(&app.service).await;
    let page = json_of(&mut res).await;
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["items"][0]["title"], "100% attendance");

    let mut res = TestClient::get(url("/api/search?q=ATTENDANCE")).send(&app.service).await;
    assert_eq!(json_of(&mut res).await["pagination"]["total"], 2);
}

#[tokio::test]
async fn files_attach_download_and_delete() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let mut res = TestClient::post(url("/api/content"))
        .bearer_auth(&admin)
        .json(&json!({ "title": "Worksheet", "type": "material" }))
        .send(&app.service)
        .await;
    let content_id = json_of(&mut res).await["id"].as_i64().expect("id");

    let (content_type, body) = multipart("Worksheet 1.TXT", "text/plain", "solve for x");
    let mut res = TestClient::post(url(&format!("/api/content/{content_id}/files")))
        .bearer_auth(&admin)
        .add_header("content-type", content_type, true)
        .body(body)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let uploaded = json_of(&mut res).await;
    let file = &uploaded["files"][0];
    assert_eq!(file["filename"], "Worksheet 1.TXT");
    assert_eq!(file["mime_type"], "text/plain");
    let stored = file["stored_filename"].as_str().expect("stored name").to_string();
    assert!(stored.ends_with(".txt"));
    let file_id = file["id"].as_i64().expect("file id");
    assert!(app.dir.path().join("uploads").join(&stored).is_file());

    let mut res = TestClient::get(url(&format!("/api/content/{content_id}")))
        .send(&app.service)
        .await;
    assert_eq!(json_of(&mut res).await["files"][0]["id"], file_id);

    let mut res = TestClient::get(url(&format!("/api/files/{file_id}/download")))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let disposition = res
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("Worksheet 1.TXT"));
    assert_eq!(res.take_string().await.expect("body"), "solve for x");

    let mut res = TestClient::get(url(&format!("/uploads/{stored}"))).send(&app.service).await;
    assert_eq!(res.take_string().await.expect("static body"), "solve for x");

    let res = TestClient::delete(url(&format!("/api/files/{file_id}")))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    assert!(!app.dir.path().join("uploads").join(&stored).exists());
    let res = TestClient::get(url(&format!("/api/files/{file_id}"))).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_nothing_is_stored() {
    let app = TestApp::new().await;
    let (_, teacher) = app.user("teacher1", Role::Teacher, None).await;

    let (content_type, body) = multipart("big.bin", "application/octet-stream", &"x".repeat(2048));
    let res = TestClient::post(url("/api/upload"))
        .bearer_auth(&teacher)
        .add_header("content-type", content_type, true)
        .body(body)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::PAYLOAD_TOO_LARGE));

    let stored = std::fs::read_dir(app.dir.path().join("uploads"))
        .expect("uploads dir")
        .count();
    assert_eq!(stored, 0);

    let (content_type, body) = multipart("small.png", "image/png", "png");
    let mut res = TestClient::post(url("/api/upload"))
        .bearer_auth(&teacher)
        .add_header("content-type", content_type, true)
        .body(body)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));
    let urls = json_of(&mut res).await;
    assert!(urls["urls"][0].as_str().expect("url").starts_with("/uploads/"));
}

#[tokio::test]
async fn export_then_import_restores_rows() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let (_, teacher) = app.user("teacher1", Role::Teacher, None).await;
    app.subject("Art").await;

    let mut res = TestClient::get(url("/api/database/export"))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let disposition = res
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("school-cms-export-"));
    let export = json_of(&mut res).await;
    assert_eq!(export["version"], 1);

    let res = TestClient::get(url("/api/database/export"))
        .bearer_auth(&teacher)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));

    let res = TestClient::post(url("/api/subjects"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "Drama" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CREATED));

    let mut res = TestClient::post(url("/api/database/import"))
        .bearer_auth(&admin)
        .json(&export)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    assert_eq!(json_of(&mut res).await["imported"]["subjects"], 1);

    let mut res = TestClient::get(url("/api/subjects")).send(&app.service).await;
    let subjects = json_of(&mut res).await;
    assert_eq!(subjects.as_array().map(Vec::len), Some(1));
    assert_eq!(subjects[0]["name"], "Art");

    let mut bad = export.clone();
    bad["version"] = json!(99);
    let res = TestClient::post(url("/api/database/import"))
        .bearer_auth(&admin)
        .json(&bad)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let mut res = TestClient::get(url("/api/stats"))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    let stats = json_of(&mut res).await;
    assert_eq!(stats["users_total"], 2);
    assert_eq!(stats["subjects"], 1);
}

#[tokio::test]
async fn ids_beyond_the_key_range_are_rejected() {
    let app = TestApp::new().await;
    let (admin, admin_token) = app.user("principal", Role::Admin, None).await;
    let subject_id = app.subject("Maths").await;
    let wide = |id: i64| id + (1 << 32);

    let res = TestClient::delete(url(&format!("/api/users/{}", wide(admin.id))))
        .bearer_auth(&admin_token)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let admins = app.state.db_manager.user_store().count_admins().await.expect("count");
    assert_eq!(admins, 1);

    let res = TestClient::get(url(&format!("/api/subjects/{}", wide(subject_id))))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let res = TestClient::get(url(&format!("/api/content?author_id={}", wide(admin.id))))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
}

#[tokio::test]
async fn import_with_bad_timestamp_is_rejected_and_login_still_works() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;

    let mut res = TestClient::get(url("/api/database/export"))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    let mut export = json_of(&mut res).await;
    export["users"][0]["created_at"] = json!("not-a-date");

    let mut res = TestClient::post(url("/api/database/import"))
        .bearer_auth(&admin)
        .json(&export)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let error = json_of(&mut res).await["error"].as_str().unwrap_or_default().to_string();
    assert!(error.contains("invalid timestamp"), "{error}");

    let res = TestClient::post(url("/api/auth/login"))
        .json(&json!({ "username": "principal", "password": PASSWORD }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
}

#[tokio::test]
async fn deleting_author_keeps_their_content() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let maths = app.subject("Maths").await;
    let (teacher, teacher_token) = app.user("teacher1", Role::Teacher, Some(maths)).await;

    let mut res = TestClient::post(url("/api/content"))
        .bearer_auth(&teacher_token)
        .json(&json!({ "title": "Fractions" }))
        .send(&app.service)
        .await;
    let content_id = json_of(&mut res).await["id"].as_i64().expect("id");

    let res = TestClient::delete(url(&format!("/api/users/{}", teacher.id)))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));

    let mut res = TestClient::get(url(&format!("/api/content/{content_id}")))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let post = json_of(&mut res).await;
    assert_eq!(post["title"], "Fractions");
    assert_eq!(post["author_id"], Value::Null);
}

#[tokio::test]
async fn deleting_content_removes_its_files_from_disk() {
    let app = TestApp::new().await;
    let (_, admin) = app.user("principal", Role::Admin, None).await;
    let (content_id, file_id, stored) = app.post_with_file(&admin, "Worksheet").await;
    let stored_path = app.dir.path().join("uploads").join(&stored);
    assert!(stored_path.is_file());

    let res = TestClient::delete(url(&format!("/api/content/{content_id}")))
        .bearer_auth(&admin)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));

    assert!(!stored_path.exists());
    let res = TestClient::get(url(&format!("/api/files/{file_id}"))).send(&app.service).await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn teacher_cannot_delete_files_on_another_teachers_post() {
    let app = TestApp::new().await;
    let maths = app.subject("Maths").await;
    let (_, owner) = app.user("teacher1", Role::Teacher, Some(maths)).await;
    let (_, other) = app.user("teacher2", Role::Teacher, Some(maths)).await;
    let (_, file_id, stored) = app.post_with_file(&owner, "Homework").await;

    let res = TestClient::delete(url(&format!("/api/files/{file_id}")))
        .bearer_auth(&other)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::FORBIDDEN));
    assert!(app.dir.path().join("uploads").join(&stored).is_file());

    let res = TestClient::delete(url(&format!("/api/files/{file_id}")))
        .bearer_auth(&owner)
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
}

#[tokio::test]
async fn user_validation_errors_name_the_field() {
    let app = TestApp::new().await;
    let (admin, admin_token) = app.user("principal", Role::Admin, None).await;

    let mut res = TestClient::post(url("/api/users"))
        .bearer_auth(&admin_token)
        .json(&json!({ "username": "x", "password": "long-enough", "role": "student" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let error = json_of(&mut res).await["error"].as_str().unwrap_or_default().to_string();
    assert!(error.starts_with("username must be"), "{error}");

    let mut res = TestClient::put(url(&format!("/api/users/{}", admin.id)))
        .bearer_auth(&admin_token)
        .json(&json!({ "password": "abc" }))
        .send(&app.service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
    let error = json_of(&mut res).await["error"].as_str().unwrap_or_default().to_string();
    assert!(error.starts_with("password must be"), "{error}");
}
