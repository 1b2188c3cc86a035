diesel::table! {
    documents (collection, id) {
        collection -> Varchar,
        id -> Varchar,
        version -> Int8,
        data -> Jsonb,
        updated_at -> Timestamptz,
    }
}
