//! JNI bindings for Android.
//!
//! These functions are called from Kotlin via the JNI bridge.

use jni::objects::{JByteArray, JClass, JString};
use jni::sys::jstring;
use jni::JNIEnv;

use crate::{process_sheet, process_sheet_file, score_to_json, Classifiers};

/// Recognize a sheet image file and return the score as JSON.
///
/// Called from Kotlin as:
///   external fun processFile(path: String): String?
#[no_mangle]
pub extern "system" fn Java_com_sheetscan_app_SheetScan_processFile(
    mut env: JNIEnv,
    _class: JClass,
    path: JString,
) -> jstring {
    let path_str: String = match env.get_string(&path) {
        Ok(s) => s.into(),
        Err(_) => return std::ptr::null_mut(),
    };

    match process_sheet_file(&path_str, &Classifiers::none()) {
        Ok(score) => match env.new_string(score_to_json(&score)) {
            Ok(js) => js.into_raw(),
            Err(_) => std::ptr::null_mut(),
        },
        Err(_) => std::ptr::null_mut(),
    }
}

/// Recognize sheet image bytes and return the score as JSON.
///
/// Called from Kotlin as:
///   external fun processBytes(data: ByteArray): String?
#[no_mangle]
pub extern "system" fn Java_com_sheetscan_app_SheetScan_processBytes(
    mut env: JNIEnv,
    _class: JClass,
    data: JByteArray,
) -> jstring {
    let bytes = match env.convert_byte_array(&data) {
        Ok(b) => b,
        Err(_) => return std::ptr::null_mut(),
    };

    match process_sheet(&bytes, &Classifiers::none()) {
        Ok(score) => match env.new_string(score_to_json(&score)) {
            Ok(js) => js.into_raw(),
            Err(_) => std::ptr::null_mut(),
        },
        Err(_) => std::ptr::null_mut(),
    }
}

/// Render a recognized score (as JSON) to a WAV file and return the
/// timing map as JSON.
///
/// Called from Kotlin as:
///   external fun renderWav(scoreJson: String, wavPath: String,
///                          sf2Path: String?, tempo: Int): String?
#[no_mangle]
pub extern "system" fn Java_com_sheetscan_app_SheetScan_renderWav(
    mut env: JNIEnv,
    _class: JClass,
    score_json: JString,
    wav_path: JString,
    sf2_path: JString,
    tempo: jni::sys::jint,
) -> jstring {
    let json: String = match env.get_string(&score_json) {
        Ok(s) => s.into(),
        Err(_) => return std::ptr::null_mut(),
    };
    let out_path: String = match env.get_string(&wav_path) {
        Ok(s) => s.into(),
        Err(_) => return std::ptr::null_mut(),
    };
    let soundfont = if sf2_path.is_null() {
        None
    } else {
        env.get_string(&sf2_path)
            .ok()
            .map(String::from)
            .and_then(|p| crate::load_soundfont_file(&p).ok())
    };

    let score = match crate::score_from_json(&json) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let options = crate::RenderOptions {
        tempo_bpm: if (40..=240).contains(&tempo) { tempo as u16 } else { 120 },
        ..Default::default()
    };

    match crate::render_audio(&score, &options, soundfont.as_ref()) {
        Ok(rendered) => {
            if std::fs::write(&out_path, &rendered.wav).is_err() {
                return std::ptr::null_mut();
            }
            match env.new_string(crate::timing_map_to_json(&rendered.timing_map)) {
                Ok(js) => js.into_raw(),
                Err(_) => std::ptr::null_mut(),
            }
        }
        Err(_) => std::ptr::null_mut(),
    }
}
