use diesel::sql_types::*;

table! {
    use super::*;

    buckets (bucket_id) {
        bucket_id -> BigInt,
        bucket -> Text,
        dataset_id -> BigInt,
    }
}

table! {
    use super::*;

    dataset_environments (dataset_id, environment_id) {
        dataset_id -> BigInt,
        environment_id -> BigInt,
    }
}

table! {
    use super::*;

    dataset_scripts (dataset_id, script_id) {
        dataset_id -> BigInt,
        script_id -> BigInt,
    }
}

table! {
    use super::*;

    datasets (dataset_id) {
        dataset_id -> BigInt,
        did -> Text,
        site_id -> Nullable<BigInt>,
        processing_id -> BigInt,
        osinfo_id -> BigInt,
        parent_id -> Nullable<BigInt>,
        create_at -> BigInt,
        create_by -> Text,
        modify_at -> BigInt,
        modify_by -> Text,
    }
}

table! {
    use super::*;

    datasets_files (dataset_id, file_id, file_type) {
        dataset_id -> BigInt,
        file_id -> BigInt,
        file_type -> Text,
    }
}

table! {
    use super::*;

    environments (environment_id) {
        environment_id -> BigInt,
        name -> Text,
        version -> Text,
        details -> Text,
        os_id -> Nullable<BigInt>,
    }
}

table! {
    use super::*;

    files (file_id) {
        file_id -> BigInt,
        file -> Text,
        is_file_valid -> Integer,
        dataset_id -> BigInt,
        create_at -> BigInt,
        create_by -> Text,
        modify_at -> BigInt,
        modify_by -> Text,
    }
}

table! {
    use super::*;

    osinfo (os_id) {
        os_id -> BigInt,
        name -> Text,
        kernel -> Text,
        version -> Text,
    }
}

table! {
    use super::*;

    parents (dataset_id, parent_id) {
        dataset_id -> BigInt,
        parent_id -> BigInt,
    }
}

table! {
    use super::*;

    processing (processing_id) {
        processing_id -> BigInt,
        name -> Text,
    }
}

table! {
    use super::*;

    scripts (script_id) {
        script_id -> BigInt,
        name -> Text,
        options -> Text,
    }
}

table! {
    use super::*;

    sites (site_id) {
        site_id -> BigInt,
        site -> Text,
    }
}

joinable!(buckets -> datasets (dataset_id));
joinable!(dataset_environments -> datasets (dataset_id));
joinable!(dataset_environments -> environments (environment_id));
joinable!(dataset_scripts -> datasets (dataset_id));
joinable!(dataset_scripts -> scripts (script_id));
joinable!(datasets -> osinfo (osinfo_id));
joinable!(datasets -> processing (processing_id));
joinable!(datasets_files -> datasets (dataset_id));
joinable!(datasets_files -> files (file_id));
joinable!(files -> datasets (dataset_id));

allow_tables_to_appear_in_same_query!(
    buckets,
    dataset_environments,
    dataset_scripts,
    datasets,
    datasets_files,
    environments,
    files,
    osinfo,
    parents,
    processing,
    scripts,
    sites,
);
